//! Opening interactive shells on lab nodes.

use log::{debug, warn};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::Settings;
use crate::protocol::{Stream, encode_frame};

const PIPE_CAPACITY: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;
const RELEASE_GRACE: Duration = Duration::from_secs(1);

/// Starts a shell on a node and hands back its multiplexed channel.
pub trait Spawner {
    type Channel: AsyncRead + AsyncWrite + Unpin;

    fn spawn(&self, node: &str) -> impl Future<Output = io::Result<Self::Channel>>;

    fn release(&self, channel: Self::Channel) -> impl Future<Output = io::Result<()>>;
}

/// Runs the configured spawn command as a child process.
///
/// The child's stdout and stderr are re-framed onto one channel so the
/// session sees the same stream layout a container exec attach produces.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    settings: Settings,
}

impl CommandSpawner {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl Spawner for CommandSpawner {
    type Channel = ProcessChannel;

    async fn spawn(&self, node: &str) -> io::Result<ProcessChannel> {
        let argv = self.settings.spawn_argv(node);
        let Some((program, args)) = argv.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty spawn command"));
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!("Spawned {:?} for {}", argv, node);

        let missing = |name: &str| io::Error::new(io::ErrorKind::BrokenPipe, format!("child {} not piped", name));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let (output, sink) = tokio::io::duplex(PIPE_CAPACITY);
        let sink = Arc::new(Mutex::new(sink));
        let pumps = vec![
            tokio::spawn(pump(stdout, Stream::Stdout, sink.clone())),
            tokio::spawn(pump(stderr, Stream::Stderr, sink)),
        ];

        Ok(ProcessChannel {
            child,
            stdin,
            output,
            pumps,
        })
    }

    async fn release(&self, channel: ProcessChannel) -> io::Result<()> {
        let ProcessChannel {
            mut child,
            mut stdin,
            pumps,
            ..
        } = channel;

        if let Err(e) = stdin.shutdown().await {
            debug!("Closing shell stdin failed: {}", e);
        }
        drop(stdin);

        match timeout(RELEASE_GRACE, child.wait()).await {
            Ok(status) => debug!("Shell exited with {}", status?),
            Err(_) => {
                warn!("Shell still running after {:?}, killing it", RELEASE_GRACE);
                child.kill().await?;
            }
        }

        for pump in pumps {
            pump.abort();
        }
        Ok(())
    }
}

async fn pump<R>(mut source: R, stream: Stream, sink: Arc<Mutex<DuplexStream>>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let read = source.read(&mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        let frame = encode_frame(stream, &buf[..read]);
        sink.lock().await.write_all(&frame).await?;
    }
}

/// Child stdin for commands, framed stdout/stderr for output.
pub struct ProcessChannel {
    child: Child,
    stdin: ChildStdin,
    output: DuplexStream,
    pumps: Vec<JoinHandle<io::Result<()>>>,
}

impl AsyncRead for ProcessChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.output).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProcessChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
