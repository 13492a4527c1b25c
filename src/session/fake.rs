//! An in-memory vtysh stand-in for session tests.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf};

use crate::NodeId;
use crate::exec::Spawner;
use crate::protocol::{Stream, Timeouts, encode_frame};

pub const REJECTION: &str = "% Unknown command.";

/// How the fake shell behaves.
#[derive(Debug, Clone)]
pub struct FakeShell {
    pub banner: bool,
    /// Node and command prefix answered with a stderr diagnostic
    pub reject: Option<(NodeId, String)>,
    pub refuse_spawn: Option<NodeId>,
}

impl Default for FakeShell {
    fn default() -> Self {
        Self {
            banner: true,
            reject: None,
            refuse_spawn: None,
        }
    }
}

type CommandLog = Arc<Mutex<Vec<(NodeId, String)>>>;

pub struct FakeSpawner {
    shell: FakeShell,
    commands: CommandLog,
    released: Arc<Mutex<Vec<NodeId>>>,
}

impl FakeSpawner {
    pub fn new(shell: FakeShell) -> Self {
        Self {
            shell,
            commands: Arc::default(),
            released: Arc::default(),
        }
    }

    pub fn timeouts() -> Timeouts {
        Timeouts {
            read: Duration::from_millis(50),
            write: Duration::from_millis(200),
            drain_retries: 0,
        }
    }

    /// Lines received by `node`, in order.
    pub fn commands(&self, node: &str) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(from, _)| from == node)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn releases(&self) -> Vec<NodeId> {
        self.released.lock().unwrap().clone()
    }
}

impl Spawner for FakeSpawner {
    type Channel = FakeChannel;

    async fn spawn(&self, node: &str) -> io::Result<FakeChannel> {
        if self.shell.refuse_spawn.as_deref() == Some(node) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such container: {}", node),
            ));
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(
            node.to_string(),
            server,
            self.shell.clone(),
            self.commands.clone(),
        ));

        Ok(FakeChannel {
            node: node.to_string(),
            stream: client,
        })
    }

    async fn release(&self, channel: FakeChannel) -> io::Result<()> {
        self.released.lock().unwrap().push(channel.node);
        Ok(())
    }
}

/// Answers show commands with an echo frame followed by one output frame.
async fn serve(node: NodeId, server: DuplexStream, shell: FakeShell, commands: CommandLog) -> io::Result<()> {
    let (reader, mut writer) = tokio::io::split(server);

    writer
        .write_all(&encode_frame(Stream::Stderr, b"vtysh.conf: No such file or directory\n"))
        .await?;
    if shell.banner {
        writer
            .write_all(&encode_frame(Stream::Stdout, b"\nHello, this is FRRouting (version 9.1).\n"))
            .await?;
    }

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        commands.lock().unwrap().push((node.clone(), line.clone()));

        let rejected = matches!(&shell.reject, Some((target, prefix)) if *target == node && line.starts_with(prefix.as_str()));
        if rejected {
            let message = format!("{}\n", REJECTION);
            writer.write_all(&encode_frame(Stream::Stderr, message.as_bytes())).await?;
            continue;
        }

        let command = line.strip_prefix("do ").unwrap_or(&line);
        if command.starts_with("sh ") {
            let echo = format!("{}# ", node);
            let output = format!("{}: {}\n", node, line);
            writer.write_all(&encode_frame(Stream::Stdout, echo.as_bytes())).await?;
            writer.write_all(&encode_frame(Stream::Stdout, output.as_bytes())).await?;
        }
    }

    Ok(())
}

pub struct FakeChannel {
    node: NodeId,
    stream: DuplexStream,
}

impl AsyncRead for FakeChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for FakeChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
