//! Replication job documents
//!
//! A job is a document in the `_replicator` database. Its id is derived
//! from the endpoints it connects, so proposing the same pair twice
//! always addresses the same document.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::server::UserCtx;

/// Job id for a source/target pair: lowercase hex SHA-256 of `source || target`
pub fn job_id(source: &str, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(target.as_bytes());
    hex::encode(hasher.finalize())
}

/// Replication state as reported by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Running; the document must not be touched
    Triggered,
    #[serde(alias = "failed")]
    Error,
    Completed,
    /// No state yet, or one this client does not know
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Unknown => "unknown",
            JobState::Triggered => "triggered",
            JobState::Error => "error",
            JobState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A replication job document
///
/// Fields prefixed with `_replication` are written by the server only;
/// they are read back but never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationJob {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(deserialize_with = "endpoint_url")]
    pub source: String,

    #[serde(deserialize_with = "endpoint_url")]
    pub target: String,

    #[serde(default)]
    pub continuous: bool,

    #[serde(default)]
    pub create_target: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ctx: Option<UserCtx>,

    #[serde(default, skip_serializing)]
    pub owner: Option<String>,

    #[serde(rename = "_replication_state", default, skip_serializing)]
    pub state: JobState,

    #[serde(
        rename = "_replication_state_reason",
        default,
        deserialize_with = "reason_text",
        skip_serializing
    )]
    pub state_reason: Option<String>,

    #[serde(
        rename = "_replication_state_time",
        default,
        deserialize_with = "state_time",
        skip_serializing
    )]
    pub state_time: Option<DateTime<Utc>>,

    #[serde(rename = "_replication_id", default, skip_serializing)]
    pub replication_id: Option<String>,
}

impl ReplicationJob {
    /// Propose a new job; the id is computed from the endpoints
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        continuous: bool,
        create_target: bool,
        user_ctx: Option<UserCtx>,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: job_id(&source, &target),
            revision: None,
            source,
            target,
            continuous,
            create_target,
            user_ctx,
            owner: None,
            state: JobState::Unknown,
            state_reason: None,
            state_time: None,
            replication_id: None,
        }
    }

    /// Currently running on the server
    pub fn is_active(&self) -> bool {
        self.state == JobState::Triggered
    }

    /// Same endpoints and mode, ignoring server-managed fields
    pub fn same_spec(&self, other: &ReplicationJob) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.continuous == other.continuous
            && self.create_target == other.create_target
    }
}

/// Endpoints are either a URL string or an object with a `url` field
#[derive(Deserialize)]
#[serde(untagged)]
enum Endpoint {
    Url(String),
    Object { url: String },
}

fn endpoint_url<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Endpoint::deserialize(deserializer)? {
        Endpoint::Url(url) => url,
        Endpoint::Object { url } => url,
    })
}

/// Older servers report unix seconds, newer ones RFC 3339
#[derive(Deserialize)]
#[serde(untagged)]
enum StateTime {
    Text(DateTime<Utc>),
    Seconds(i64),
}

fn state_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match Option::<StateTime>::deserialize(deserializer)? {
        Some(StateTime::Text(time)) => Some(time),
        Some(StateTime::Seconds(secs)) => Utc.timestamp_opt(secs, 0).single(),
        None => None,
    })
}

fn reason_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_job_id_is_sha256_of_concatenation() {
        assert_eq!(
            job_id("a", "bc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(
            job_id("http://couch-2:5984/orders", "orders"),
            job_id("http://couch-2:5984/orders", "invoices")
        );
    }

    #[test]
    fn test_new_job_has_no_server_state() {
        let job = ReplicationJob::new("http://couch-2:5984/orders", "orders", true, false, None);
        assert_eq!(job.id, job_id("http://couch-2:5984/orders", "orders"));
        assert_eq!(job.revision, None);
        assert_eq!(job.state, JobState::Unknown);

        let body = serde_json::to_value(&job).unwrap();
        assert_eq!(body["_id"], json!(job.id));
        assert_eq!(body["continuous"], json!(true));
        assert!(body.get("_rev").is_none());
        assert!(body.get("_replication_state").is_none());
        assert!(body.get("owner").is_none());
    }

    #[test]
    fn test_decode_server_document() {
        let job: ReplicationJob = serde_json::from_value(json!({
            "_id": "abc",
            "_rev": "3-f00",
            "source": { "url": "http://couch-2:5984/orders", "headers": {} },
            "target": "orders",
            "continuous": true,
            "owner": "admin",
            "_replication_state": "triggered",
            "_replication_state_time": 1370112720,
            "_replication_id": "c0ebe9256695ff083347cbf95f93e280+continuous",
        }))
        .unwrap();

        assert_eq!(job.source, "http://couch-2:5984/orders");
        assert_eq!(job.revision.as_deref(), Some("3-f00"));
        assert!(job.is_active());
        assert!(!job.create_target);
        assert_eq!(job.state_time.unwrap().timestamp(), 1370112720);
    }

    #[test]
    fn test_decode_states() {
        let decode = |state: serde_json::Value| -> JobState {
            let job: ReplicationJob = serde_json::from_value(json!({
                "_id": "x", "source": "a", "target": "b",
                "_replication_state": state,
                "_replication_state_time": "2026-10-18T09:30:00+02:00",
                "_replication_state_reason": { "error": "unauthorized" },
            }))
            .unwrap();
            assert_eq!(job.state_time.unwrap().to_rfc3339(), "2026-10-18T07:30:00+00:00");
            assert!(job.state_reason.unwrap().contains("unauthorized"));
            job.state
        };

        assert_eq!(decode(json!("triggered")), JobState::Triggered);
        assert_eq!(decode(json!("completed")), JobState::Completed);
        assert_eq!(decode(json!("error")), JobState::Error);
        assert_eq!(decode(json!("failed")), JobState::Error);
        assert_eq!(decode(json!("crashing")), JobState::Unknown);
    }

    #[test]
    fn test_same_spec_ignores_server_fields() {
        let proposed = ReplicationJob::new("a", "b", false, true, None);
        let mut stored = proposed.clone();
        stored.revision = Some("1-a".into());
        stored.state = JobState::Completed;
        assert!(proposed.same_spec(&stored));

        stored.continuous = true;
        assert!(!proposed.same_spec(&stored));
    }

    proptest! {
        #[test]
        fn prop_job_id_is_deterministic(source in ".{0,40}", target in ".{0,40}") {
            let first = job_id(&source, &target);
            prop_assert_eq!(first.len(), 64);
            prop_assert_eq!(first, ReplicationJob::new(source.clone(), target.clone(), false, false, None).id);
        }
    }
}
