//! # rackctl core
//!
//! The provisioning pipeline, leaves first:
//!
//! * **[`ssh`]**: runs one command on a remote host and returns its output.
//! * **[`pki`]**: CA, client and server certificates, validation and regeneration.
//! * **[`provision`]**: the step sequence that turns a bare host into a TLS-secured runtime.
//! * **[`swarm`]**: starts the cluster agents once the runtime answers.
//! * **[`batch`]**: expands a host range and provisions it host by host.
//!
//! [`store`] persists host records and [`connection`] turns them back into
//! client flags and shell environments.

pub mod batch;
pub mod connection;
pub mod error;
pub mod pki;
pub mod provision;
pub mod ssh;
pub mod store;
pub mod swarm;

pub use error::{Error, Result, StepFailure};
