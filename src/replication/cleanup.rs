//! Replication job removal

use serde::Deserialize;
use tracing::info;

use super::registry::ReplicatorRegistry;
use super::REPLICATOR_DB;
use crate::client::{CouchClient, WriteAck};
use crate::databases::DeletionReport;
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct Revision {
    #[serde(rename = "_rev")]
    rev: String,
}

async fn delete_revision(client: &CouchClient, id: &str, rev: &str) -> Result<()> {
    let ack: WriteAck = client.delete(&[REPLICATOR_DB, id], &[("rev", rev)]).await?;
    if !ack.ok {
        return Err(Error::NotAcknowledged(format!("deletion of replication job {}", id)));
    }
    info!(job = %id, "Replication job deleted");
    Ok(())
}

/// Delete one job by id, looking up its current revision first
pub async fn delete_job(client: &CouchClient, id: &str) -> Result<()> {
    let current: Revision = client.get(&[REPLICATOR_DB, id], &[]).await?;
    delete_revision(client, id, &current.rev).await
}

/// Delete jobs by id, one at a time, stopping at the first failure
pub async fn delete_jobs(client: &CouchClient, ids: &[String]) -> DeletionReport<String> {
    let mut report = DeletionReport::default();
    for id in ids {
        match delete_job(client, id).await {
            Ok(()) => report.deleted.push(id.clone()),
            Err(e) => {
                report.failure = Some((id.clone(), e));
                break;
            }
        }
    }
    report
}

/// Delete every job in the registry, in id order
///
/// Stops at the first failure; jobs deleted before it stay deleted.
pub async fn delete_all(client: &CouchClient, registry: &ReplicatorRegistry) -> DeletionReport<String> {
    let mut report = DeletionReport::default();

    for job in registry.jobs() {
        let result = match job.revision.as_deref() {
            Some(rev) => delete_revision(client, &job.id, rev).await,
            None => delete_job(client, &job.id).await,
        };
        match result {
            Ok(()) => report.deleted.push(job.id.clone()),
            Err(e) => {
                report.failure = Some((job.id.clone(), e));
                break;
            }
        }
    }

    report
}
