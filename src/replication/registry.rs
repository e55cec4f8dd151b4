//! Replicator registry
//!
//! Snapshot of the `_replicator` database, keyed by job id.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use super::job::ReplicationJob;
use super::REPLICATOR_DB;
use crate::client::CouchClient;
use crate::error::Result;
use crate::resource::INTERNAL_PREFIX;

#[derive(Deserialize)]
struct AllDocs {
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct Row {
    id: String,
    #[serde(default)]
    doc: Option<serde_json::Value>,
}

/// Jobs currently stored on a server
#[derive(Debug, Clone, Default)]
pub struct ReplicatorRegistry {
    jobs: BTreeMap<String, ReplicationJob>,
}

impl ReplicatorRegistry {
    /// Read every job document
    ///
    /// Design documents are skipped before decoding. A failed listing
    /// discards everything; a single document that is not a job is
    /// logged and left out.
    pub async fn fetch(client: &CouchClient) -> Result<Self> {
        let all: AllDocs = client
            .get(&[REPLICATOR_DB, "_all_docs"], &[("include_docs", "true")])
            .await?;

        let mut jobs = BTreeMap::new();
        for row in all.rows {
            if row.id.starts_with(INTERNAL_PREFIX) {
                continue;
            }
            let Some(doc) = row.doc else {
                warn!(id = %row.id, "Replicator row has no document, skipping");
                continue;
            };
            match serde_json::from_value::<ReplicationJob>(doc) {
                Ok(job) => {
                    jobs.insert(row.id, job);
                }
                Err(e) => warn!(id = %row.id, error = %e, "Not a replication job, skipping"),
            }
        }

        debug!("Fetched {} replication jobs", jobs.len());
        Ok(Self { jobs })
    }

    /// Build a registry from already known jobs
    pub fn from_jobs(jobs: impl IntoIterator<Item = ReplicationJob>) -> Self {
        Self {
            jobs: jobs.into_iter().map(|job| (job.id.clone(), job)).collect(),
        }
    }

    pub fn lookup(&self, id: &str) -> Option<&ReplicationJob> {
        self.jobs.get(id)
    }

    /// Jobs in id order
    pub fn jobs(&self) -> impl Iterator<Item = &ReplicationJob> {
        self.jobs.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
