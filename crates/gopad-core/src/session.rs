//! Per-submission sessions and the process-wide registry.
//!
//! A [`Session`] ties one execution to its stdin/stdout queues and terminal
//! signal. The caller-facing half (input sender, parked output receiver,
//! `done` token) lives on the session; the driver-facing half
//! ([`SessionPipes`]) is handed to the execution task, and dropping it when
//! the task exits is what closes the output queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::INPUT_TIMEOUT;
use crate::errors::InputError;
use crate::types::{InputOperation, ProgramOutput};

/// The per-submission execution context.
pub struct Session {
    input_tx: mpsc::Sender<String>,
    output_rx: Mutex<Option<mpsc::Receiver<ProgramOutput>>>,
    done: CancellationToken,
    input_ops: OnceLock<Vec<InputOperation>>,
}

/// The driver-facing halves of a session's queues.
pub struct SessionPipes {
    pub output_tx: mpsc::Sender<ProgramOutput>,
    pub input_rx: mpsc::Receiver<String>,
}

impl Session {
    /// Create a session and the pipes for its execution driver.
    pub fn new() -> (Arc<Session>, SessionPipes) {
        let (input_tx, input_rx) = mpsc::channel(1);
        let (output_tx, output_rx) = mpsc::channel(1);
        let session = Arc::new(Session {
            input_tx,
            output_rx: Mutex::new(Some(output_rx)),
            done: CancellationToken::new(),
            input_ops: OnceLock::new(),
        });
        (session, SessionPipes { output_tx, input_rx })
    }

    /// Mark the session terminal. Idempotent; every waiter on [`done`] is
    /// released exactly once.
    ///
    /// [`done`]: Session::done
    pub fn close(&self) {
        self.done.cancel();
    }

    /// The one-shot terminal signal. Closed exactly once by [`close`].
    ///
    /// [`close`]: Session::close
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Whether the session has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Record the input-operation catalog discovered by the safety gate.
    /// Only the first call has any effect.
    pub fn set_input_ops(&self, ops: Vec<InputOperation>) {
        let _ = self.input_ops.set(ops);
    }

    /// The input-operation catalog, empty until the gate has run.
    pub fn input_ops(&self) -> &[InputOperation] {
        self.input_ops.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Queue one line of stdin for the running program.
    ///
    /// Waits up to the input deadline for the coordinator to accept the
    /// line. A session that has terminated (or terminates while waiting)
    /// reports [`InputError::Closed`].
    pub async fn send_input(&self, line: String) -> Result<(), InputError> {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => Err(InputError::Closed),
            sent = tokio::time::timeout(INPUT_TIMEOUT, self.input_tx.send(line)) => {
                match sent {
                    Err(_) => Err(InputError::Timeout),
                    Ok(Err(_)) => Err(InputError::Closed),
                    Ok(Ok(())) => Ok(()),
                }
            }
        }
    }

    /// Take the output receiver. The stream endpoint is the single consumer;
    /// a second call returns `None`.
    pub fn take_output(&self) -> Option<mpsc::Receiver<ProgramOutput>> {
        self.output_rx.lock().ok().and_then(|mut parked| parked.take())
    }
}

/// Process-wide map from session identifier to live session.
///
/// Identifiers are monotonically increasing and never reused within a
/// process lifetime.
pub struct SessionRegistry {
    sessions: DashMap<u64, Arc<Session>>,
    counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    /// Assign the next identifier and register the session under it.
    pub fn register(&self, session: Arc<Session>) -> u64 {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: u64) {
        self.sessions.remove(&id);
    }

    /// Close and unregister a previous session, releasing its stream
    /// consumer and aborting its coordinator.
    pub fn preempt(&self, id: u64) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            log::debug!("preempting session {}", id);
            session.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
