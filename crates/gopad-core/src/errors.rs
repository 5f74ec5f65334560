//! Error types for the execution core.
//!
//! Each subsystem has its own enum so callers can map failures to the right
//! boundary: sandbox errors are fatal at process start, validation errors are
//! synchronous rejections that never create a session, and execution errors
//! are coerced into exactly one terminal output record.

use thiserror::Error;

use crate::config::MAX_CODE_SIZE;

/// Failures talking to the container engine or managing the container.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("container is not running")]
    NotRunning,
    #[error("exec stream was not attached")]
    Detached,
}

/// Safety-gate rejections. No session exists when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("source exceeds the maximum size of {MAX_CODE_SIZE} bytes")]
    TooLarge,
    #[error("invalid or potentially unsafe Go code")]
    Unsafe,
    #[error("failed to analyze code for input operations: {0}")]
    Analysis(String),
}

/// Terminal failures inside the execution pipeline. Every variant surfaces
/// to the caller as a single `{error, done: true}` record.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("staging: {0}")]
    Staging(String),
    /// The build exec exited non-zero; the payload is the compiler's stderr,
    /// forwarded verbatim (no phase prefix) because its diagnostics are
    /// user-facing.
    #[error("{0}")]
    Compile(String),
    #[error("compile: {0}")]
    CompileIo(String),
    #[error("run: {0}")]
    RunIo(String),
    #[error("formatting failed: {0}")]
    Format(String),
    #[error("execution timed out")]
    Timeout,
}

/// Failures posting a stdin line into a session. Local to the posting
/// request; the session itself is unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("program execution completed")]
    Closed,
    #[error("timeout waiting for program to accept input")]
    Timeout,
}
