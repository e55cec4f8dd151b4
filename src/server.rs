//! Server-level endpoints: welcome banner, session, active tasks and statistics

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::CouchClient;
use crate::error::Result;

/// Authenticated identity, as reported by `_session`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCtx {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserCtx {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role == "_admin")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub ok: bool,
    #[serde(rename = "userCtx")]
    pub user_ctx: UserCtx,
    #[serde(default)]
    pub info: serde_json::Value,
}

/// Identity of the client's credentials
pub async fn session(client: &CouchClient) -> Result<Session> {
    client.get(&["_session"], &[]).await
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vendor {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Welcome banner returned by `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub couchdb: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Vendor>,
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CouchDB {}", self.version)?;
        if let Some(vendor) = &self.vendor {
            write!(f, " ({})", vendor.name)?;
        }
        if let Some(uuid) = &self.uuid {
            write!(f, " uuid={}", uuid)?;
        }
        Ok(())
    }
}

pub async fn server_info(client: &CouchClient) -> Result<ServerInfo> {
    client.get(&[], &[]).await
}

/// One entry of `_active_tasks`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<i64>,
}

impl ActiveTask {
    /// One-line human summary
    pub fn summary(&self) -> String {
        let mut line = self.kind.clone();
        match (&self.source, &self.target) {
            (Some(source), Some(target)) => line.push_str(&format!(" {} -> {}", source, target)),
            _ => {
                if let Some(db) = &self.database {
                    line.push_str(&format!(" {}", db));
                }
                if let Some(design) = &self.design_document {
                    line.push_str(&format!(" {}", design));
                }
            }
        }
        if self.continuous {
            line.push_str(" (continuous)");
        }
        if let Some(progress) = self.progress {
            line.push_str(&format!(" {}%", progress));
        }
        line
    }
}

/// Running tasks, optionally only those of one type (`replication`, `indexer`, ...)
pub async fn active_tasks(client: &CouchClient, kind: Option<&str>) -> Result<Vec<ActiveTask>> {
    let tasks: Vec<ActiveTask> = client.get(&["_active_tasks"], &[]).await?;
    Ok(match kind {
        Some(kind) => tasks.into_iter().filter(|task| task.kind == kind).collect(),
        None => tasks,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawStat {
    #[serde(default)]
    description: String,
    #[serde(default)]
    current: Option<f64>,
    #[serde(default)]
    sum: Option<f64>,
    #[serde(default)]
    mean: Option<f64>,
    #[serde(default)]
    stddev: Option<f64>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

/// One server statistic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stat {
    pub section: String,
    pub key: String,
    pub description: String,
    pub current: Option<f64>,
    pub sum: Option<f64>,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Server statistics, all of them or one `(section, key)`, sorted
pub async fn stats(client: &CouchClient, only: Option<(&str, &str)>) -> Result<Vec<Stat>> {
    let raw: BTreeMap<String, BTreeMap<String, RawStat>> = match only {
        Some((section, key)) => client.get(&["_stats", section, key], &[]).await?,
        None => client.get(&["_stats"], &[]).await?,
    };

    Ok(raw
        .into_iter()
        .flat_map(|(section, entries)| {
            entries.into_iter().map(move |(key, stat)| Stat {
                section: section.clone(),
                key,
                description: stat.description,
                current: stat.current,
                sum: stat.sum,
                mean: stat.mean,
                stddev: stat.stddev,
                min: stat.min,
                max: stat.max,
            })
        })
        .filter(|stat| match only {
            Some((section, key)) => stat.section == section && stat.key == key,
            None => true,
        })
        .collect())
}
