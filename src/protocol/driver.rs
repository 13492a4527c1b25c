//! Frame-level reads and command writes over one shell channel.
//!
//! A shell interleaves two streams on the channel: the startup banner and
//! errors arrive on [`Stream::Stderr`], command responses on
//! [`Stream::Stdout`]. [`SessionDriver::drop_while`] skips noise and
//! [`SessionDriver::take_while`] collects exactly one response without
//! running into the next one.
//!
//! Every wait is bounded. A write that cannot complete within the write
//! timeout is fatal. A read that finds nothing within the read timeout means
//! the shell has nothing more to say right now and is reported as
//! [`FrameRead::Drained`].

use log::{debug, trace};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use super::command::cmdline;
use super::frame::{FrameHeader, HEADER_LEN, Stream};
use crate::NodeId;
use crate::error::DriverError;

/// Largest single read; payload buffers grow by at most this much per read.
const CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
    /// Extra read waits before a silent channel counts as drained
    pub drain_retries: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(1),
            write: Duration::from_secs(1),
            drain_retries: 0,
        }
    }
}

/// Result of waiting for the next frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    Frame(FrameHeader),
    Drained,
}

/// Result of [`SessionDriver::drop_while`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Payload length of the first frame that did not match
    FrameAvailable(usize),
    Drained,
}

pub struct SessionDriver<C> {
    node: NodeId,
    channel: BufReader<C>,
    timeouts: Timeouts,
    pushed_back: Option<FrameHeader>,
    /// Payload bytes of the last handed-out header not yet read
    unread: usize,
}

impl<C> SessionDriver<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(node: impl Into<NodeId>, channel: C, timeouts: Timeouts) -> Self {
        Self {
            node: node.into(),
            channel: BufReader::new(channel),
            timeouts,
            pushed_back: None,
            unread: 0,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn into_inner(self) -> C {
        self.channel.into_inner()
    }

    /// Writes `argv` as one quoted command line.
    pub async fn send_command<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<(), DriverError> {
        let command = cmdline(argv);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');

        let result = timeout(self.timeouts.write, write_line(&mut self.channel, &line)).await;
        match result {
            Ok(Ok(())) => {
                debug!("{} <- {}", self.node, command);
                Ok(())
            }
            Ok(Err(source)) => Err(self.io_error(source)),
            Err(_) => Err(DriverError::WriteTimeout {
                node: self.node.clone(),
                command,
            }),
        }
    }

    /// Next frame header, or `Drained` when the channel stays silent.
    ///
    /// Any payload left unread from the previous header is skipped first, so
    /// frame boundaries hold even if a caller ignores a payload.
    pub async fn read_frame_header(&mut self) -> Result<FrameRead, DriverError> {
        if self.unread > 0 {
            let unread = self.unread;
            self.discard(unread).await?;
        }

        if let Some(header) = self.pushed_back.take() {
            self.unread = header.len;
            return Ok(FrameRead::Frame(header));
        }

        if !self.wait_readable().await? {
            return Ok(FrameRead::Drained);
        }

        let mut raw = [0u8; HEADER_LEN];
        let received = self.fill(&mut raw).await?;
        if received < HEADER_LEN {
            return Err(self.truncated(HEADER_LEN, received));
        }

        let header = FrameHeader::parse(&raw).map_err(|source| DriverError::Frame {
            node: self.node.clone(),
            source,
        })?;
        trace!("{} -> {} frame of {} bytes", self.node, header.stream, header.len);

        self.unread = header.len;
        Ok(FrameRead::Frame(header))
    }

    /// Reads a `len` byte payload.
    ///
    /// The buffer grows with the bytes actually received, so a corrupt header
    /// length ends in `TruncatedFrame` rather than a huge allocation.
    pub async fn read_exactly(&mut self, len: usize) -> Result<Vec<u8>, DriverError> {
        let mut payload = Vec::with_capacity(len.min(CHUNK));
        let mut scratch = [0u8; CHUNK];

        while payload.len() < len {
            let chunk = (len - payload.len()).min(CHUNK);
            let received = self.fill(&mut scratch[..chunk]).await?;
            self.consumed(received);
            payload.extend_from_slice(&scratch[..received]);
            if received < chunk {
                return Err(self.truncated(len, payload.len()));
            }
        }

        Ok(payload)
    }

    pub async fn discard(&mut self, len: usize) -> Result<(), DriverError> {
        let mut scratch = [0u8; CHUNK];
        let mut remaining = len;

        while remaining > 0 {
            let chunk = remaining.min(CHUNK);
            let received = self.fill(&mut scratch[..chunk]).await?;
            self.consumed(received);
            if received < chunk {
                return Err(self.truncated(len, len - remaining + received));
            }
            remaining -= chunk;
        }

        Ok(())
    }

    /// Discards consecutive frames whose stream matches `predicate`.
    ///
    /// Returns the payload length of the first frame that does not match; its
    /// header is consumed and its payload is next on the channel.
    pub async fn drop_while<P>(&mut self, predicate: P) -> Result<ReadOutcome, DriverError>
    where
        P: Fn(Stream) -> bool,
    {
        loop {
            match self.read_frame_header().await? {
                FrameRead::Drained => return Ok(ReadOutcome::Drained),
                FrameRead::Frame(header) if predicate(header.stream) => {
                    self.discard(header.len).await?;
                }
                FrameRead::Frame(header) => return Ok(ReadOutcome::FrameAvailable(header.len)),
            }
        }
    }

    /// Consecutive frames whose stream matches `predicate`, as a single-pass run.
    pub fn take_while<P>(&mut self, predicate: P) -> FrameRun<'_, C, P>
    where
        P: Fn(Stream) -> bool,
    {
        FrameRun {
            driver: self,
            predicate,
            exhausted: false,
        }
    }

    fn push_back(&mut self, header: FrameHeader) {
        self.unread = 0;
        self.pushed_back = Some(header);
    }

    fn consumed(&mut self, bytes: usize) {
        self.unread = self.unread.saturating_sub(bytes);
    }

    async fn wait_readable(&mut self) -> Result<bool, DriverError> {
        for attempt in 0..=self.timeouts.drain_retries {
            let waited = timeout(self.timeouts.read, self.channel.fill_buf())
                .await
                .map(|filled| filled.map(|buffered| !buffered.is_empty()));
            match waited {
                Ok(Ok(readable)) => return Ok(readable),
                Ok(Err(source)) => return Err(self.io_error(source)),
                Err(_) if attempt < self.timeouts.drain_retries => {
                    debug!("{} silent for {:?}, waiting again", self.node, self.timeouts.read);
                }
                Err(_) => {}
            }
        }
        Ok(false)
    }

    /// Reads until `buf` is full, the channel closes or a read stalls.
    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let mut received = 0;
        while received < buf.len() {
            match timeout(self.timeouts.read, self.channel.read(&mut buf[received..])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(read)) => received += read,
                Ok(Err(source)) => return Err(self.io_error(source)),
            }
        }
        Ok(received)
    }

    fn truncated(&self, expected: usize, received: usize) -> DriverError {
        DriverError::TruncatedFrame {
            node: self.node.clone(),
            expected,
            received,
        }
    }

    fn io_error(&self, source: io::Error) -> DriverError {
        DriverError::Io {
            node: self.node.clone(),
            source,
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> io::Result<()> {
    writer.write_all(line).await?;
    writer.flush().await
}

/// Payload lengths of consecutive frames matching a predicate.
///
/// Single pass and not restartable: once a frame fails the predicate, or the
/// channel drains, the run is exhausted for good. The failing frame is pushed
/// back into the driver untouched. A payload the caller does not read with
/// [`FrameRun::read_payload`] is skipped by the next call to [`FrameRun::next`].
pub struct FrameRun<'a, C, P> {
    driver: &'a mut SessionDriver<C>,
    predicate: P,
    exhausted: bool,
}

impl<C, P> FrameRun<'_, C, P>
where
    C: AsyncRead + AsyncWrite + Unpin,
    P: Fn(Stream) -> bool,
{
    pub async fn next(&mut self) -> Result<Option<usize>, DriverError> {
        if self.exhausted {
            return Ok(None);
        }

        let read = self.driver.read_frame_header().await;
        match read {
            Ok(FrameRead::Frame(header)) if (self.predicate)(header.stream) => Ok(Some(header.len)),
            Ok(FrameRead::Frame(header)) => {
                self.driver.push_back(header);
                self.exhausted = true;
                Ok(None)
            }
            Ok(FrameRead::Drained) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(e) => {
                self.exhausted = true;
                Err(e)
            }
        }
    }

    /// Reads the payload of the frame last yielded by [`FrameRun::next`].
    pub async fn read_payload(&mut self) -> Result<Vec<u8>, DriverError> {
        let len = self.driver.unread;
        self.driver.read_exactly(len).await
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
