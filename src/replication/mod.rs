//! Replication Module
//!
//! Manages pull replication jobs stored in the `_replicator` database:
//! reading the current jobs, reconciling them against a set of source
//! databases, and removing them again.

mod cleanup;
mod job;
mod reconcile;
mod registry;

pub use cleanup::{delete_all, delete_job, delete_jobs};
pub use job::{job_id, JobState, ReplicationJob};
pub use reconcile::{
    reconcile, AppliedJob, JobAction, ReconcileFailure, ReconcileReport, SkipReason,
    SkippedCandidate,
};
pub use registry::ReplicatorRegistry;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::client::CouchClient;
use crate::config::ReplicationDefaults;
use crate::error::{Error, Result};
use crate::resource::Database;
use crate::server::{self, UserCtx};

/// Database holding replication job documents
pub const REPLICATOR_DB: &str = "_replicator";

/// What to do when a job upsert is rejected because the stored
/// revision changed underneath us
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Stop the run and report the conflict
    #[default]
    Abort,
    /// Record the candidate as skipped and move on
    Continue,
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(ConflictPolicy::Abort),
            "continue" => Ok(ConflictPolicy::Continue),
            other => Err(Error::Config(format!(
                "conflict policy must be 'abort' or 'continue', got '{}'",
                other
            ))),
        }
    }
}

/// Options applied to every job proposed in one reconciliation run
#[derive(Debug, Clone, Default)]
pub struct ReplicationOptions {
    pub continuous: bool,
    pub create_target: bool,
    /// Identity the jobs run as; the caller's session when `None`
    pub user_ctx: Option<UserCtx>,
    pub on_conflict: ConflictPolicy,
}

impl From<&ReplicationDefaults> for ReplicationOptions {
    fn from(defaults: &ReplicationDefaults) -> Self {
        Self {
            continuous: defaults.continuous,
            create_target: defaults.create_target,
            user_ctx: None,
            on_conflict: defaults.on_conflict,
        }
    }
}

/// Pull every candidate onto the client's server
///
/// Resolves the caller's identity when none was given, reads the
/// registry once, then reconciles.
pub async fn pull(
    client: &CouchClient,
    candidates: &[Database],
    mut options: ReplicationOptions,
) -> Result<ReconcileReport> {
    if options.user_ctx.is_none() {
        options.user_ctx = Some(server::session(client).await?.user_ctx);
    }

    let registry = ReplicatorRegistry::fetch(client).await?;
    Ok(reconcile(client, &registry, candidates, &options).await)
}
