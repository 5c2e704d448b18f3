//! Sequential archive sessions
//!
//! A session moves `Closed -> Open(Read | Write) -> Closed`. Reads yield a
//! forward-only packet stream; writes append packets in order. `close()` is
//! idempotent and must run on every exit path: it waits for the codec thread
//! and, in write mode, reports any error raised while finishing the archive.
//! Dropping an open session stops the codec thread as well, but discards its
//! outcome.

use std::fs::File;
use std::path::{Path, PathBuf};

use knapsack_common::{KnapsackError, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Codec, Compression, Packet, Selection};

/// Packets buffered between the codec thread and the session
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Read,
    Write,
}

enum State {
    Closed,
    Reading {
        rx: mpsc::Receiver<Result<Packet>>,
        task: Option<JoinHandle<()>>,
    },
    Writing {
        tx: mpsc::Sender<Packet>,
        task: JoinHandle<Result<()>>,
    },
}

/// Single-owner handle over one archive file
pub struct ArchiveSession {
    path: PathBuf,
    selection: Selection,
    capacity: usize,
    state: State,
}

impl ArchiveSession {
    pub fn new(path: impl Into<PathBuf>, selection: Selection) -> Self {
        Self {
            path: path.into(),
            selection,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            state: State::Closed,
        }
    }

    /// Number of packets the codec thread may read ahead
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> Codec {
        self.selection.codec
    }

    pub fn compression(&self) -> Option<Compression> {
        self.selection.compression
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, State::Closed)
    }

    pub fn mode(&self) -> Option<SessionMode> {
        match self.state {
            State::Closed => None,
            State::Reading { .. } => Some(SessionMode::Read),
            State::Writing { .. } => Some(SessionMode::Write),
        }
    }

    /// Open the underlying file and start the codec thread
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(&mut self, mode: SessionMode) -> Result<()> {
        if self.is_open() {
            return Err(KnapsackError::SessionState(format!(
                "{} is already open",
                self.path.display()
            )));
        }

        let Selection { codec, compression } = self.selection;
        match mode {
            SessionMode::Read => {
                let file = File::open(&self.path)?;
                let (tx, rx) = mpsc::channel(self.capacity);
                let task = tokio::task::spawn_blocking(move || {
                    if let Err(err) = codec.read_packets(file, compression, &tx) {
                        let _ = tx.blocking_send(Err(err));
                    }
                });
                self.state = State::Reading {
                    rx,
                    task: Some(task),
                };
            },
            SessionMode::Write => {
                let file = File::create(&self.path)?;
                let (tx, mut rx) = mpsc::channel(self.capacity);
                let task = tokio::task::spawn_blocking(move || {
                    codec.write_packets(file, compression, &mut rx)
                });
                self.state = State::Writing { tx, task };
            },
        }

        debug!(
            path = %self.path.display(),
            codec = codec.name(),
            compression = compression.map(|c| c.name()),
            ?mode,
            "archive session opened"
        );
        Ok(())
    }

    /// Next packet, or `None` at end of archive
    pub async fn next(&mut self) -> Result<Option<Packet>> {
        let State::Reading { rx, task } = &mut self.state else {
            return Err(KnapsackError::SessionState(
                "session is not open for reading".to_string(),
            ));
        };

        match rx.recv().await {
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(err)) => Err(err),
            None => {
                if let Some(task) = task.take() {
                    task.await.map_err(|e| {
                        KnapsackError::Archive(format!("archive reader failed: {}", e))
                    })?;
                }
                Ok(None)
            },
        }
    }

    /// Append a packet
    pub async fn write(&mut self, packet: Packet) -> Result<()> {
        let State::Writing { tx, .. } = &self.state else {
            return Err(KnapsackError::SessionState(
                "session is not open for writing".to_string(),
            ));
        };

        tx.send(packet).await.map_err(|_| {
            KnapsackError::SessionState(
                "archive writer stopped; close the session to see why".to_string(),
            )
        })
    }

    /// Release the archive. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => Ok(()),
            State::Reading { rx, task } => {
                drop(rx);
                if let Some(task) = task {
                    if let Err(e) = task.await {
                        warn!(path = %self.path.display(), error = %e, "archive reader ended abnormally");
                    }
                }
                debug!(path = %self.path.display(), "archive session closed");
                Ok(())
            },
            State::Writing { tx, task } => {
                drop(tx);
                task.await.map_err(|e| {
                    KnapsackError::Archive(format!("archive writer failed: {}", e))
                })??;
                debug!(path = %self.path.display(), "archive written and closed");
                Ok(())
            },
        }
    }
}

impl std::fmt::Debug for ArchiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSession")
            .field("path", &self.path)
            .field("codec", &self.selection.codec)
            .field("compression", &self.selection.compression)
            .field("mode", &self.mode())
            .finish()
    }
}
