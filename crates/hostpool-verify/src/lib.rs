//! hostpool-verify — gate new hosts into the pool.
//!
//! A host is checked over one remote session, stage by stage, before it is
//! persisted. The first failing stage aborts the rest and names itself in
//! the error. Verification never touches the inventory.
//!
//! # Components
//!
//! - **`executor`**: `RemoteExecutor`/`RemoteSession` traits
//! - **`ssh`**: OpenSSH CLI implementation (`ssh`, `sshpass`)
//! - **`probe`**: Stage commands and output parsers
//! - **`pipeline`**: The `Verifier` running the ordered stages
//! - **`scripted`**: Canned-output executor for tests

pub mod error;
pub mod executor;
pub mod pipeline;
pub mod probe;
pub mod scripted;
pub mod ssh;

pub use error::{VerifyError, VerifyResult};
pub use executor::{CommandOutput, ExecError, RemoteExecutor, RemoteSession, RemoteTarget};
pub use pipeline::{Stage, Verifier};
pub use scripted::ScriptedExecutor;
pub use ssh::OpenSshExecutor;
