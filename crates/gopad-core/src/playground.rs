//! The composed execution core: one sandbox, one registry, one gate.
//!
//! [`Playground`] is handed to the HTTP layer instead of module-level state.
//! `submit` is the single entry point for a submission: the safety gate runs
//! synchronously (a rejection creates no session and issues no exec), then a
//! session is registered and the execution driver is spawned under the
//! 30-second deadline. Whatever happens, the driver emits at most one
//! terminal error record, closes the session, and unregisters it.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::config::EXECUTION_TIMEOUT;
use crate::errors::{ExecError, SandboxError, ValidationError};
use crate::executor::Executor;
use crate::gate;
use crate::sandbox::Sandbox;
use crate::session::{Session, SessionPipes, SessionRegistry};
use crate::types::ProgramOutput;

pub struct Playground {
    sandbox: Arc<Sandbox>,
    executor: Executor,
    registry: Arc<SessionRegistry>,
}

impl Playground {
    pub fn new(sandbox: Sandbox) -> Self {
        let sandbox = Arc::new(sandbox);
        Self {
            executor: Executor::new(sandbox.clone()),
            sandbox,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Bring the sandbox container up (or adopt it). Fatal to the process
    /// when it fails.
    pub async fn ensure(&self) -> Result<(), SandboxError> {
        self.sandbox.ensure().await
    }

    /// Whether the engine still answers for the sandbox container.
    pub async fn health(&self) -> Result<(), SandboxError> {
        self.sandbox.is_healthy().await
    }

    /// Format source with the sandboxed `gofmt`.
    pub async fn format(&self, code: &str) -> Result<String, ExecError> {
        self.executor.format(code).await
    }

    /// Look up a live session.
    pub fn session(&self, id: u64) -> Option<Arc<Session>> {
        self.registry.get(id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Accept a submission.
    ///
    /// Validates synchronously, preempts the caller's previous session if
    /// one is named, registers a fresh session, and spawns its execution
    /// driver. Returns the new session identifier.
    pub fn submit(
        &self,
        code: String,
        previous_session: Option<u64>,
    ) -> Result<u64, ValidationError> {
        gate::validate(&code)?;
        let input_ops = gate::detect_input_ops(&code)?;

        if let Some(previous) = previous_session {
            self.registry.preempt(previous);
        }

        let (session, pipes) = Session::new();
        session.set_input_ops(input_ops);
        let session_id = self.registry.register(session.clone());
        log::info!("session {} accepted ({} bytes)", session_id, code.len());

        let executor = self.executor.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            execute(executor, code, session, pipes, session_id, registry).await;
        });

        Ok(session_id)
    }
}

/// The execution driver: compile then run under one deadline, then tear the
/// session down.
async fn execute(
    executor: Executor,
    code: String,
    session: Arc<Session>,
    mut pipes: SessionPipes,
    session_id: u64,
    registry: Arc<SessionRegistry>,
) {
    let started = Instant::now();

    let outcome = tokio::time::timeout(EXECUTION_TIMEOUT, async {
        executor.compile(&code).await?;
        executor.run(&session, &mut pipes).await
    })
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => send_error(&pipes.output_tx, &session, err.to_string()).await,
        Err(_) => {
            log::warn!("session {} hit the execution deadline", session_id);
            send_error(&pipes.output_tx, &session, ExecError::Timeout.to_string()).await;
        }
    }

    log::info!(
        "session {} finished in {:?}",
        session_id,
        started.elapsed()
    );
    session.close();
    registry.remove(session_id);
}

/// Deliver one terminal error record unless the session terminated first.
async fn send_error(output_tx: &mpsc::Sender<ProgramOutput>, session: &Session, message: String) {
    tokio::select! {
        biased;
        _ = session.done().cancelled() => {}
        _ = output_tx.send(ProgramOutput::fatal(message)) => {}
    }
}
