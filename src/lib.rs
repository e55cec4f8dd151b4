//! couchdb-utils - CouchDB Administration Toolkit
//!
//! Operational helpers for a CouchDB server: list databases, views and
//! replication jobs, set up pull replication from other servers, refresh
//! view indexes in bulk and delete documents.
//!
//! # Architecture
//!
//! Every operation takes an explicit [`CouchClient`]; there is no global
//! connection state. Replication jobs are reconciled against a snapshot
//! of the `_replicator` database taken once per run, and view refreshes
//! fan out through a bounded-concurrency executor.
//!
//! # Features
//!
//! - Deterministic replication job ids, so reruns never duplicate jobs
//! - Running replications are never overwritten
//! - Stale-refresh of view indexes with bounded concurrency and a deadline
//! - Typed resource locators that round-trip through their string form
//! - Text, URI and JSON output

pub mod client;
pub mod config;
pub mod databases;
pub mod error;
pub mod fanout;
pub mod output;
pub mod replication;
pub mod resource;
pub mod server;
pub mod views;

#[cfg(test)]
mod fake_couch;

pub use client::CouchClient;
pub use config::CouchConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::CouchClient;
    pub use crate::config::CouchConfig;
    pub use crate::error::{Error, Result};
    pub use crate::fanout::{FanoutExecutor, FanoutReport, FanoutTask};
    pub use crate::replication::{ReconcileReport, ReplicationJob, ReplicationOptions, ReplicatorRegistry};
    pub use crate::resource::{Database, DesignDoc, Document, Resource, View};
}
