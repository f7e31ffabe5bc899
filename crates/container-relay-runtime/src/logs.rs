//! Log tail stream backed by a `logs --follow` child process.

use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use container_relay_core::{RuntimeAttachment, RuntimeError, RuntimeEvent, RuntimeStream};
use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    sync::{Mutex, mpsc},
};
use tokio_stream::wrappers::ReceiverStream;

use crate::command::CommandParts;

const READ_BUF: usize = 8 * 1024;
const EVENT_CAPACITY: usize = 64;

/// Read-only stream over a log-following process.
///
/// Stdout and stderr are merged into one event stream; `End` is emitted once
/// both pipes reach EOF.
pub struct LogStream {
    child: Mutex<Option<Child>>,
}

impl LogStream {
    /// Spawn the log process and attach to its output.
    ///
    /// # Errors
    /// Returns error if the process cannot be spawned.
    pub fn spawn(parts: &CommandParts) -> std::io::Result<RuntimeAttachment> {
        let mut cmd = parts.to_tokio();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let readers: Vec<_> = [
            stdout.map(|out| tokio::spawn(forward(out, tx.clone()))),
            stderr.map(|err| tokio::spawn(forward(err, tx.clone()))),
        ]
        .into_iter()
        .flatten()
        .collect();

        tokio::spawn(async move {
            let mut failed = false;
            for reader in readers {
                failed |= !reader.await.unwrap_or(false);
            }
            if !failed {
                let _ = tx.send(RuntimeEvent::End).await;
            }
        });

        Ok(RuntimeAttachment {
            stream: Box::new(Self {
                child: Mutex::new(Some(child)),
            }),
            events: ReceiverStream::new(rx).boxed(),
        })
    }
}

/// Forward one pipe. Returns `false` if the pipe failed and an error was reported.
///
/// Chunks end on character boundaries: an incomplete trailing UTF-8 sequence is
/// held back until the rest of it arrives on the same pipe, so output from the
/// other pipe never lands inside a character.
async fn forward<R>(mut reader: R, tx: mpsc::Sender<RuntimeEvent>) -> bool
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUF];
    let mut carry: Vec<u8> = Vec::with_capacity(MAX_CARRY);
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                if !carry.is_empty() {
                    let _ = tx.send(RuntimeEvent::Data(Bytes::from(carry))).await;
                }
                return true;
            }
            Ok(n) => {
                carry.extend_from_slice(&buf[..n]);
                let boundary = utf8_boundary(&carry);
                if boundary == 0 {
                    continue;
                }
                let chunk = Bytes::copy_from_slice(&carry[..boundary]);
                carry.drain(..boundary);
                if tx.send(RuntimeEvent::Data(chunk)).await.is_err() {
                    // Receiver gone: the session is tearing down.
                    return true;
                }
            }
            Err(e) => {
                tracing::debug!("Log pipe read failed: {e}");
                let _ = tx.send(RuntimeEvent::Error(e.to_string())).await;
                return false;
            }
        }
    }
}

/// Longest incomplete sequence that can trail a chunk.
const MAX_CARRY: usize = 3;

/// Length of the prefix of `bytes` that does not end inside a UTF-8 sequence.
///
/// Only the last three bytes are examined; invalid input passes through whole.
fn utf8_boundary(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(MAX_CARRY) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

#[async_trait]
impl RuntimeStream for LogStream {
    async fn write(&self, _data: &[u8]) -> Result<(), RuntimeError> {
        Err(RuntimeError::Unsupported("log streams are read-only"))
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = child.start_kill() {
            // Already exited.
            tracing::debug!("Log process kill: {e}");
        }
        let status = child.wait().await?;
        tracing::debug!(?status, "Log process reaped");
        Ok(())
    }
}
