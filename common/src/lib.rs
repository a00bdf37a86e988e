//! # rackctl common
//!
//! Types shared between the provisioning core and the command line:
//!
//! * **[`config`]**: runtime settings of a provisioning run.
//! * **[`network`]**: address range expansion and host identities.
//! * **[`host`]**: drivers, credentials, certificate paths and host records.

pub mod config;
pub mod host;
pub mod network;
