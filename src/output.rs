//! Output rendering
//!
//! Every renderer returns the full text to print. `text` is meant for
//! people and for piping back into the tool (view listings use the
//! `database design view` tuple form that `refresh` accepts), `uri`
//! prints absolute URLs for resource listings, `json` is machine
//! readable. Credentials are always masked.

use std::fmt::Display;
use std::str::FromStr;

use reqwest::Url;
use serde_json::{json, Value};

use crate::client::{redact, CouchClient};
use crate::databases::DeletionReport;
use crate::error::{Error, Result};
use crate::replication::{ReconcileReport, ReplicationJob, ReplicatorRegistry, REPLICATOR_DB};
use crate::resource::{Database, View};
use crate::server::{ActiveTask, ServerInfo, Session, Stat};
use crate::views::RefreshReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Text,
    Uri,
    Json,
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Format::Text),
            "uri" => Ok(Format::Uri),
            "json" => Ok(Format::Json),
            other => Err(Error::Config(format!(
                "output format must be text, uri or json, got '{}'",
                other
            ))),
        }
    }
}

/// Mask the password of anything that parses as a URL
fn redact_str(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) if url.password().is_some() => redact(&url),
        _ => raw.to_string(),
    }
}

fn pretty(value: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn lines<I: IntoIterator<Item = String>>(items: I) -> String {
    items.into_iter().collect::<Vec<_>>().join("\n")
}

pub fn databases(dbs: &[Database], client: &CouchClient, format: Format) -> Result<String> {
    match format {
        Format::Text => Ok(lines(dbs.iter().map(|db| db.name().to_string()))),
        Format::Uri => Ok(lines(
            dbs.iter()
                .map(|db| db.uri(client).map(|url| redact(&url)))
                .collect::<Result<Vec<_>>>()?,
        )),
        Format::Json => pretty(&json!(dbs.iter().map(Database::name).collect::<Vec<_>>())),
    }
}

pub fn views(views: &[View], client: &CouchClient, format: Format) -> Result<String> {
    match format {
        Format::Text => Ok(lines(views.iter().map(|view| {
            if view.database().is_absolute() {
                return view.to_string();
            }
            format!(
                "{}\t{}\t{}",
                view.database().name(),
                view.design().name(),
                view.name()
            )
        }))),
        Format::Uri => Ok(lines(
            views
                .iter()
                .map(|view| view.uri(client).map(|url| redact(&url)))
                .collect::<Result<Vec<_>>>()?,
        )),
        Format::Json => pretty(&Value::Array(
            views
                .iter()
                .map(|view| {
                    json!({
                        "database": view.database().name(),
                        "design": view.design().name(),
                        "view": view.name(),
                    })
                })
                .collect(),
        )),
    }
}

fn job_json(job: &ReplicationJob) -> Value {
    json!({
        "id": job.id,
        "rev": job.revision,
        "source": redact_str(&job.source),
        "target": redact_str(&job.target),
        "continuous": job.continuous,
        "create_target": job.create_target,
        "state": job.state.as_str(),
        "state_reason": job.state_reason,
        "state_time": job.state_time.map(|t| t.to_rfc3339()),
    })
}

pub fn replicators(registry: &ReplicatorRegistry, client: &CouchClient, format: Format) -> Result<String> {
    match format {
        Format::Text => Ok(lines(registry.jobs().map(|job| {
            let mut line = format!(
                "{}  {} -> {}  [{}]",
                job.id,
                redact_str(&job.source),
                redact_str(&job.target),
                job.state
            );
            if job.continuous {
                line.push_str(" continuous");
            }
            if let Some(reason) = &job.state_reason {
                line.push_str(&format!(" ({})", reason));
            }
            line
        }))),
        Format::Uri => Ok(lines(
            registry
                .jobs()
                .map(|job| client.url(&[REPLICATOR_DB, &job.id]).map(|url| redact(&url)))
                .collect::<Result<Vec<_>>>()?,
        )),
        Format::Json => pretty(&Value::Array(registry.jobs().map(job_json).collect())),
    }
}

/// Reports render the same for `text` and `uri`
pub fn reconcile(report: &ReconcileReport, format: Format) -> Result<String> {
    match format {
        Format::Json => pretty(&json!({
            "applied": report.applied,
            "skipped": report.skipped,
            "failure": report.failure.as_ref().map(|f| json!({
                "database": f.database.to_string(),
                "error": f.error.to_string(),
            })),
        })),
        _ => {
            let mut out: Vec<String> = report
                .applied
                .iter()
                .map(|job| format!("{} {} {}", job.action.as_str(), job.database, job.job_id))
                .collect();
            out.extend(
                report
                    .skipped
                    .iter()
                    .map(|s| format!("skipped {} ({})", s.database, s.reason.as_str())),
            );
            if let Some(failure) = &report.failure {
                out.push(format!("failed {}: {}", failure.database, failure.error));
            }
            Ok(lines(out))
        }
    }
}

pub fn refresh(report: &RefreshReport, format: Format) -> Result<String> {
    let refreshed = report.refreshed.values().flatten();
    match format {
        Format::Json => pretty(&json!({
            "refreshed": refreshed.map(|v| v.to_string()).collect::<Vec<_>>(),
            "failed": report.failed.iter().map(|(view, error)| json!({
                "view": view.to_string(),
                "error": error.to_string(),
            })).collect::<Vec<_>>(),
            "unconfirmed": report.unconfirmed.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
        })),
        _ => {
            let mut out: Vec<String> = refreshed.map(|view| format!("refreshed {}", view)).collect();
            out.extend(
                report
                    .failed
                    .iter()
                    .map(|(view, error)| format!("failed {}: {}", view, error)),
            );
            out.extend(
                report
                    .unconfirmed
                    .iter()
                    .map(|view| format!("unconfirmed {} (design document request failed)", view)),
            );
            Ok(lines(out))
        }
    }
}

pub fn deletions<T: Display>(report: &DeletionReport<T>, format: Format) -> Result<String> {
    match format {
        Format::Json => pretty(&json!({
            "deleted": report.deleted.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            "failure": report.failure.as_ref().map(|(item, error)| json!({
                "item": item.to_string(),
                "error": error.to_string(),
            })),
        })),
        _ => {
            let mut out: Vec<String> = report.deleted.iter().map(|d| format!("deleted {}", d)).collect();
            if let Some((item, error)) = &report.failure {
                out.push(format!("failed {}: {}", item, error));
            }
            Ok(lines(out))
        }
    }
}

pub fn session(session: &Session, format: Format) -> Result<String> {
    match format {
        Format::Json => pretty(&serde_json::to_value(session)?),
        _ => Ok(format!(
            "{} [{}]",
            session.user_ctx.name.as_deref().unwrap_or("(anonymous)"),
            session.user_ctx.roles.join(", ")
        )),
    }
}

pub fn server(info: &ServerInfo, format: Format) -> Result<String> {
    match format {
        Format::Json => pretty(&serde_json::to_value(info)?),
        _ => Ok(info.to_string()),
    }
}

pub fn tasks(tasks: &[ActiveTask], format: Format) -> Result<String> {
    match format {
        Format::Json => pretty(&serde_json::to_value(tasks)?),
        _ => Ok(lines(tasks.iter().map(ActiveTask::summary))),
    }
}

pub fn stats(stats: &[Stat], format: Format) -> Result<String> {
    match format {
        Format::Json => pretty(&serde_json::to_value(stats)?),
        _ => Ok(lines(stats.iter().map(|stat| {
            let value = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
            format!(
                "{}/{}\tcurrent={} mean={} max={}\t{}",
                stat.section,
                stat.key,
                value(stat.current),
                value(stat.mean),
                value(stat.max),
                stat.description
            )
        }))),
    }
}
