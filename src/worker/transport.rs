// src/worker/transport.rs
//! Line-framed transport to one external worker process
//!
//! Spawns the worker as a subprocess with piped stdin/stdout and frames the
//! protocol by line boundaries. Writes are atomic per record and flushed
//! before the call returns; the read side is a lazy record sequence that
//! ends with [`TransportError::Closed`] on EOF. The sink and stream are
//! generic over the underlying stream types so tests can run them over an
//! in-memory duplex pipe.

use crate::protocol::{Command, encode_command};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::timeout;

/// Stream-level failures, fatal to the session that owns the transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The worker closed its end of the stream
    #[error("Worker stream closed")]
    Closed,

    /// I/O failure on the underlying stream
    #[error("Worker I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Write half of a worker connection
pub struct RecordSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> RecordSink<W> {
    /// Wraps a writer as a record sink
    pub fn new(writer: W) -> Self {
        RecordSink { writer }
    }

    /// Writes one encoded record and flushes it before returning
    pub async fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        let record = encode_command(command);
        self.writer.write_all(record.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Closes the write half
    ///
    /// For a subprocess this closes the worker's stdin, which is the signal
    /// that unblocks a worker waiting on its read loop.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Read half of a worker connection
pub struct RecordStream<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> RecordStream<R> {
    /// Wraps a reader as a record stream
    pub fn new(reader: R) -> Self {
        RecordStream {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Returns the next raw record, skipping blank lines
    ///
    /// # Errors
    /// [`TransportError::Closed`] on end of stream, [`TransportError::Io`]
    /// on a read failure. Either terminates the sequence.
    pub async fn next_record(&mut self) -> Result<String, TransportError> {
        loop {
            match self.lines.next_line().await? {
                Some(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Ok(trimmed.to_string());
                }
                None => return Err(TransportError::Closed),
            }
        }
    }
}

/// Handle to a spawned worker process
///
/// Holds the child for reaping. The process is spawned with `kill_on_drop`
/// so the handle is released on every exit path, including panics in the
/// owning task.
pub struct WorkerProcess {
    child: Child,
}

impl WorkerProcess {
    /// Spawns a worker subprocess and splits its stdio into sink and stream
    ///
    /// stderr is passed through to the coordinator's own stderr: workers log
    /// there to keep the protocol stream clean.
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<(Self, RecordSink<ChildStdin>, RecordStream<ChildStdout>), TransportError> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout unavailable"))?;

        Ok((
            WorkerProcess { child },
            RecordSink::new(stdin),
            RecordStream::new(stdout),
        ))
    }

    /// Waits for the process to exit, killing it after the grace period
    ///
    /// Called once the sink is closed. A worker that ignores the closed
    /// stdin is killed, which also unblocks any read still pending on its
    /// stdout.
    pub async fn reap(mut self, grace: Duration) {
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!("Worker process exited with {}", status);
            }
            Ok(Err(e)) => {
                log::warn!("Failed to wait for worker process: {}", e);
            }
            Err(_) => {
                log::warn!("Worker process ignored shutdown, killing it");
                if let Err(e) = self.child.kill().await {
                    log::warn!("Failed to kill worker process: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_writes_one_flushed_record() {
        let (near, far) = tokio::io::duplex(1024);
        let mut sink = RecordSink::new(near);
        let mut stream = RecordStream::new(far);

        sink.send(&Command::Stop).await.unwrap();
        let record = stream.next_record().await.unwrap();
        assert_eq!(record, r#"{"type":"stop"}"#);
    }

    #[tokio::test]
    async fn test_stream_skips_blank_lines() {
        let (near, far) = tokio::io::duplex(1024);
        let mut stream = RecordStream::new(far);

        let mut writer = near;
        writer
            .write_all(b"\n  \n{\"type\":\"stopped\"}\n")
            .await
            .unwrap();
        writer.flush().await.unwrap();

        let record = stream.next_record().await.unwrap();
        assert_eq!(record, r#"{"type":"stopped"}"#);
    }

    #[tokio::test]
    async fn test_eof_reports_closed() {
        let (near, far) = tokio::io::duplex(1024);
        let mut sink = RecordSink::new(near);
        let mut stream = RecordStream::new(far);

        sink.send(&Command::QueryInfo).await.unwrap();
        sink.close().await.unwrap();

        assert!(stream.next_record().await.is_ok());
        assert!(matches!(
            stream.next_record().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_sink_unblocks_reader() {
        let (near, far) = tokio::io::duplex(1024);
        let mut stream = RecordStream::new(far);
        drop(RecordSink::new(near));

        assert!(matches!(
            stream.next_record().await,
            Err(TransportError::Closed)
        ));
    }
}
