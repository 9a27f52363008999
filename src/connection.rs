//! Per-connection line handler.
//!
//! A connection is either reading lines or closed. Every framed line is
//! logged; the sentinel line is answered with the fixed response and the
//! connection keeps reading until the peer goes away.

use crate::protocol::{parse, Command, ParseResult, RESPONSE};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf,
};
use tracing::{debug, info, trace};

/// Read buffer growth step
const BUFFER_SIZE: usize = 4 * 1024;

/// Optional per-connection limits. Both are disabled by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Longest accepted line in bytes, including the `\n`.
    pub max_line_length: Option<usize>,
    /// Longest wait for the next read before the connection is dropped.
    pub idle_timeout: Option<Duration>,
}

/// Reasons a connection ends other than a clean EOF.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    Closed,
}

/// A single client connection with buffered read and write sides.
pub struct Connection<S> {
    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,
    buffer: BytesMut,
    /// Leading bytes of `buffer` already searched for a newline.
    scanned: usize,
    limits: Limits,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, limits: Limits) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer: BufWriter::new(writer),
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            scanned: 0,
            limits,
        }
    }

    /// Read lines until the peer closes or an error ends the connection.
    ///
    /// The stream is dropped when this returns, whatever the outcome.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        while self.step().await? == ConnState::Reading {}
        Ok(())
    }

    /// Perform one read and handle every complete line it made available.
    async fn step(&mut self) -> Result<ConnState, ConnectionError> {
        let n = self.fill_buffer().await?;
        if n == 0 {
            if !self.buffer.is_empty() {
                debug!(
                    discarded = self.buffer.len(),
                    "Dropping unterminated line at EOF"
                );
            }
            trace!("Connection closed by client");
            return Ok(ConnState::Closed);
        }

        while let ParseResult::Complete(command, consumed) =
            parse(&self.buffer, self.scanned)
        {
            self.scanned = 0;
            self.check_length(consumed)?;
            let line = self.buffer.split_to(consumed);
            info!(line = ?String::from_utf8_lossy(&line), "Line received");

            if command == Command::Sentinel {
                self.respond().await?;
            }
        }

        // Whatever is left has no newline yet.
        self.scanned = self.buffer.len();
        self.check_length(self.buffer.len())?;

        Ok(ConnState::Reading)
    }

    async fn fill_buffer(&mut self) -> Result<usize, ConnectionError> {
        self.buffer.reserve(BUFFER_SIZE);
        let read = self.reader.read_buf(&mut self.buffer);

        match self.limits.idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| ConnectionError::IdleTimeout(timeout))?
                .map_err(ConnectionError::from),
            None => Ok(read.await?),
        }
    }

    fn check_length(&self, len: usize) -> Result<(), ConnectionError> {
        match self.limits.max_line_length {
            Some(limit) if len > limit => Err(ConnectionError::LineTooLong { limit }),
            _ => Ok(()),
        }
    }

    async fn respond(&mut self) -> Result<(), ConnectionError> {
        self.writer.write_all(RESPONSE).await?;
        self.writer.flush().await?;
        debug!("Response sent");
        Ok(())
    }
}

/// Handle a client connection until it closes.
pub async fn handle_connection<S>(stream: S, limits: Limits) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite,
{
    Connection::new(stream, limits).run().await
}
