//! Interactive exec stream: the runtime CLI's `exec -it` run inside a local PTY.
//!
//! The CLI puts its own terminal into raw mode and forwards every byte to the
//! remote TTY, so the interrupt and detach sequences reach the container as
//! keystrokes would.

use std::{
    io::{ErrorKind, Read, Write},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use container_relay_core::{RuntimeAttachment, RuntimeError, RuntimeEvent, RuntimeStream};
use futures::StreamExt;
use portable_pty::{ChildKiller, MasterPty, PtySize, native_pty_system};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::command::CommandParts;

const READ_BUF: usize = 8 * 1024;
const EVENT_CAPACITY: usize = 64;
/// How long `close` lets the process react to input already written before killing it.
const CLOSE_GRACE: Duration = Duration::from_millis(300);

/// Linux reports EIO on the master side once the child's terminal closes.
#[cfg(unix)]
const EIO: i32 = 5;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

fn pty_err(e: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Pty(e.to_string())
}

/// Two-way stream over a process attached to a PTY.
pub struct PtyExecStream {
    writer: SharedWriter,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    closed: AtomicBool,
    /// Set once the reader has seen the terminal close.
    ended: watch::Receiver<bool>,
}

impl PtyExecStream {
    /// Spawn `parts` inside a fresh PTY of the given size.
    ///
    /// # Errors
    /// Returns error if the PTY cannot be opened or the process cannot be spawned.
    pub fn spawn(parts: &CommandParts, cols: u16, rows: u16) -> Result<RuntimeAttachment, RuntimeError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_err)?;

        let mut child = pair.slave.spawn_command(parts.to_pty()).map_err(pty_err)?;
        // The child holds its own handle; keeping ours would hide EOF.
        drop(pair.slave);

        let killer = child.clone_killer();
        let reader = pair.master.try_clone_reader().map_err(pty_err)?;
        let writer = pair.master.take_writer().map_err(pty_err)?;

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let (ended_tx, ended) = watch::channel(false);
        tokio::task::spawn_blocking(move || {
            read_loop(reader, &tx);
            let _ = ended_tx.send(true);
        });
        tokio::task::spawn_blocking(move || match child.wait() {
            Ok(status) => tracing::debug!(?status, "Exec process exited"),
            Err(e) => tracing::debug!("Failed to wait for exec process: {e}"),
        });

        Ok(RuntimeAttachment {
            stream: Box::new(Self {
                writer: Arc::new(Mutex::new(writer)),
                master: Mutex::new(pair.master),
                killer: Mutex::new(killer),
                closed: AtomicBool::new(false),
                ended,
            }),
            events: ReceiverStream::new(rx).boxed(),
        })
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, tx: &mpsc::Sender<RuntimeEvent>) {
    let mut buf = vec![0u8; READ_BUF];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.blocking_send(RuntimeEvent::End);
                return;
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if tx.blocking_send(RuntimeEvent::Data(chunk)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(EIO) => {
                let _ = tx.blocking_send(RuntimeEvent::End);
                return;
            }
            Err(e) => {
                let _ = tx.blocking_send(RuntimeEvent::Error(e.to_string()));
                return;
            }
        }
    }
}

#[async_trait]
impl RuntimeStream for PtyExecStream {
    async fn write(&self, data: &[u8]) -> Result<(), RuntimeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Closed);
        }
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(pty_err)??;
        Ok(())
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), RuntimeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Closed);
        }
        self.master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_err)
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Give a just-written interrupt or detach a chance to end the process.
        let mut ended = self.ended.clone();
        if tokio::time::timeout(CLOSE_GRACE, ended.wait_for(|done| *done))
            .await
            .is_ok_and(|waited| waited.is_ok())
        {
            tracing::debug!("Exec process ended before close");
        }
        let result = self
            .killer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .kill();
        if let Err(e) = result {
            // The process usually exited on its own already.
            tracing::debug!("Exec process kill: {e}");
        }
        Ok(())
    }
}
