//! Pull reconciliation
//!
//! Brings the `_replicator` database in line with a list of candidate
//! source databases, one candidate at a time. Running jobs are never
//! touched and the first unexpected error ends the run.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::job::{JobState, ReplicationJob};
use super::registry::ReplicatorRegistry;
use super::{ConflictPolicy, ReplicationOptions, REPLICATOR_DB};
use crate::client::{CouchClient, WriteAck};
use crate::error::{Error, Result};
use crate::resource::Database;

/// Whether a job document was written fresh or over an existing revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Created,
    Updated,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Created => "created",
            JobAction::Updated => "updated",
        }
    }
}

/// Why a candidate produced no write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Server-internal database
    Internal,
    /// Source and target resolve to the same database
    SameEndpoint,
    /// A job for this pair is running
    Triggered,
    /// A job for this pair exists with identical settings
    Unchanged,
    /// The upsert hit a revision conflict and the policy says continue
    Conflict,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Internal => "internal database",
            SkipReason::SameEndpoint => "source is the target",
            SkipReason::Triggered => "already running",
            SkipReason::Unchanged => "unchanged",
            SkipReason::Conflict => "revision conflict",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedJob {
    #[serde(serialize_with = "serialize_display")]
    pub database: Database,
    pub job_id: String,
    pub revision: String,
    pub action: JobAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedCandidate {
    #[serde(serialize_with = "serialize_display")]
    pub database: Database,
    pub reason: SkipReason,
}

/// The candidate whose write ended the run
#[derive(Debug)]
pub struct ReconcileFailure {
    pub database: Database,
    pub error: Error,
}

/// Outcome of one reconciliation run
///
/// Writes that happened before a failure stay in `applied`; nothing is
/// rolled back.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub applied: Vec<AppliedJob>,
    pub skipped: Vec<SkippedCandidate>,
    pub failure: Option<ReconcileFailure>,
}

impl ReconcileReport {
    fn skip(&mut self, database: &Database, reason: SkipReason) {
        debug!(database = %database, reason = reason.as_str(), "Skipping candidate");
        self.skipped.push(SkippedCandidate {
            database: database.clone(),
            reason,
        });
    }

    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Jobs written with the given action
    pub fn count(&self, action: JobAction) -> usize {
        self.applied.iter().filter(|job| job.action == action).count()
    }

    /// Applied jobs, or the error that stopped the run
    pub fn into_result(self) -> Result<Vec<AppliedJob>> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self.applied),
        }
    }
}

fn serialize_display<S: serde::Serializer>(database: &Database, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(database)
}

/// Identity of a candidate as a replication source
///
/// Databases on the client's own server are named locally, anything else
/// by its absolute locator.
fn source_identity(client: &CouchClient, candidate: &Database) -> String {
    if candidate.is_on(client) {
        candidate.name().to_string()
    } else {
        candidate.locator()
    }
}

/// Reconcile `candidates` against the registry snapshot
///
/// Each candidate becomes a pull job into the same-named database on the
/// client's server.
pub async fn reconcile(
    client: &CouchClient,
    registry: &ReplicatorRegistry,
    candidates: &[Database],
    options: &ReplicationOptions,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for candidate in candidates {
        if candidate.is_internal() {
            report.skip(candidate, SkipReason::Internal);
            continue;
        }

        let source = source_identity(client, candidate);
        let target = candidate.name().to_string();
        if source == target {
            report.skip(candidate, SkipReason::SameEndpoint);
            continue;
        }

        let mut job = ReplicationJob::new(
            source,
            target,
            options.continuous,
            options.create_target,
            options.user_ctx.clone(),
        );

        let action = match registry.lookup(&job.id) {
            Some(existing) if existing.is_active() => {
                report.skip(candidate, SkipReason::Triggered);
                continue;
            }
            // Newer servers leave running jobs without a state in the document
            Some(existing) if existing.state == JobState::Unknown && existing.same_spec(&job) => {
                report.skip(candidate, SkipReason::Unchanged);
                continue;
            }
            Some(existing) => {
                job.revision = existing.revision.clone();
                JobAction::Updated
            }
            None => JobAction::Created,
        };

        match submit(client, &job).await {
            Ok(ack) => {
                info!(
                    database = %candidate,
                    job = %ack.id,
                    action = action.as_str(),
                    "Replication job written"
                );
                report.applied.push(AppliedJob {
                    database: candidate.clone(),
                    job_id: ack.id,
                    revision: ack.rev,
                    action,
                });
            }
            Err(e) if e.is_conflict() && options.on_conflict == ConflictPolicy::Continue => {
                warn!(database = %candidate, job = %job.id, "Replication job changed concurrently, skipping");
                report.skip(candidate, SkipReason::Conflict);
            }
            Err(e) => {
                warn!(database = %candidate, job = %job.id, error = %e, "Replication job write failed");
                report.failure = Some(ReconcileFailure {
                    database: candidate.clone(),
                    error: e,
                });
                break;
            }
        }
    }

    report
}

/// Write one job document, requiring an explicit acknowledgement
async fn submit(client: &CouchClient, job: &ReplicationJob) -> Result<WriteAck> {
    let query: Vec<(&str, &str)> = job
        .revision
        .as_deref()
        .map(|rev| vec![("rev", rev)])
        .unwrap_or_default();

    let ack: WriteAck = client.put(&[REPLICATOR_DB, &job.id], &query, job).await?;
    if !ack.ok {
        return Err(Error::NotAcknowledged(format!("replication job {}", job.id)));
    }
    Ok(ack)
}
