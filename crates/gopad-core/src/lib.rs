//! Execution core for the gopad playground.
//!
//! This crate drives a single long-lived, network-isolated, resource-capped
//! Docker container and turns user-submitted Go source into interactive
//! executions. It is organized around three subsystems:
//!
//! - **Sandbox lifecycle**: one named container is adopted or created at
//!   startup and shared by every submission ([`sandbox`]).
//! - **Safety gate**: a pattern filter rejects source that would void the
//!   sandbox assumptions, and a lightweight scan discovers stdin-reading call
//!   sites so the runtime can guess when a program is waiting for input
//!   ([`gate`]).
//! - **Execution pipeline**: per submission, source is staged into the
//!   container, compiled, and run with a full-duplex stdin/stdout bridge into
//!   a per-session pair of queues ([`executor`], [`session`]).
//!
//! [`Playground`] composes the three and is the only handle the HTTP layer
//! needs.

pub mod config;
pub mod errors;
pub mod executor;
pub mod gate;
pub mod playground;
pub mod sandbox;
pub mod session;
pub mod types;

pub use config::SandboxConfig;
pub use errors::{ExecError, InputError, SandboxError, ValidationError};
pub use playground::Playground;
pub use sandbox::Sandbox;
pub use session::{Session, SessionRegistry};
pub use types::{InputOperation, ProgramOutput};
