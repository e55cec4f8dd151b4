//! View discovery and refresh
//!
//! A refresh is a `HEAD` on the view with `stale=update_after`: the
//! server answers from the current index and rebuilds it in the
//! background. Views of one design document share an index, so by default
//! a single request per design document is enough.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::client::CouchClient;
use crate::error::{Error, Result};
use crate::fanout::{FanoutExecutor, FanoutTask};
use crate::resource::{Database, DesignDoc, View};

#[derive(Deserialize)]
struct AllDocs {
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct Row {
    id: String,
    #[serde(default)]
    doc: Option<DesignBody>,
}

#[derive(Deserialize)]
struct DesignBody {
    #[serde(default)]
    views: BTreeMap<String, serde_json::Value>,
}

/// A design document with its views, sorted by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignDocViews {
    pub design: DesignDoc,
    pub views: Vec<View>,
}

/// Design documents of one database
pub async fn list_design_docs(client: &CouchClient, database: &Database) -> Result<Vec<DesignDocViews>> {
    let all: AllDocs = database
        .client_for(client)
        .get(
            &[database.name(), "_all_docs"],
            &[
                ("startkey", "\"_design/\""),
                ("endkey", "\"_design0\""),
                ("include_docs", "true"),
            ],
        )
        .await?;

    let mut designs = Vec::new();
    for row in all.rows {
        let Some(name) = row.id.strip_prefix("_design/") else {
            continue;
        };
        let design = DesignDoc::new(database.clone(), name);
        let views = row
            .doc
            .map(|doc| {
                doc.views
                    .into_keys()
                    .map(|view| View::new(design.clone(), view))
                    .collect()
            })
            .unwrap_or_default();
        designs.push(DesignDocViews { design, views });
    }

    designs.sort_by(|a, b| a.design.cmp(&b.design));
    debug!(database = %database, designs = designs.len(), "Listed design documents");
    Ok(designs)
}

/// Every view of the given databases, one database at a time
pub async fn list_views(client: &CouchClient, databases: &[Database]) -> Result<Vec<View>> {
    let mut views = Vec::new();
    for database in databases {
        for design in list_design_docs(client, database).await? {
            views.extend(design.views);
        }
    }
    Ok(views)
}

/// Ask the server to bring one view's index up to date
pub async fn refresh_view(client: &CouchClient, view: &View) -> Result<()> {
    view.database()
        .client_for(client)
        .head(&view.segments(), &[("stale", "update_after")])
        .await
}

/// Outcome of a refresh run
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Views whose index was refreshed, grouped by design document
    pub refreshed: BTreeMap<DesignDoc, Vec<View>>,
    /// The request that failed, keyed by the view it was issued for
    pub failed: Vec<(View, Error)>,
    /// Views never requested whose design document's request failed
    pub unconfirmed: Vec<View>,
}

impl RefreshReport {
    pub fn refreshed_count(&self) -> usize {
        self.refreshed.values().map(Vec::len).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Refresh views concurrently
///
/// Duplicates are dropped. Unless `every_view` is set, only the first
/// view of each design document is requested and its outcome counts for
/// all of that document's listed views; on failure the others are
/// reported as unconfirmed.
pub async fn refresh_views(
    client: &CouchClient,
    executor: &FanoutExecutor,
    views: &[View],
    every_view: bool,
) -> RefreshReport {
    let mut grouped: BTreeMap<DesignDoc, Vec<View>> = BTreeMap::new();
    for view in views {
        let group = grouped.entry(view.design().clone()).or_default();
        if !group.contains(view) {
            group.push(view.clone());
        }
    }

    let issued: Vec<View> = if every_view {
        grouped.values().flatten().cloned().collect()
    } else {
        grouped.values().filter_map(|group| group.first().cloned()).collect()
    };

    info!(
        views = views.len(),
        requests = issued.len(),
        concurrency = executor.concurrency(),
        "Refreshing views"
    );

    let tasks = issued
        .into_iter()
        .map(|view| {
            let client = client.clone();
            let target = view.clone();
            FanoutTask::new(view, async move { refresh_view(&client, &target).await })
        })
        .collect();
    let outcome = executor.run_all(tasks).await;

    let mut report = RefreshReport::default();
    for (view, ()) in outcome.succeeded {
        let design = view.design().clone();
        let covered = if every_view {
            vec![view]
        } else {
            grouped.remove(&design).unwrap_or_else(|| vec![view])
        };
        report.refreshed.entry(design).or_default().extend(covered);
    }
    for entry in report.refreshed.values_mut() {
        entry.sort();
    }
    for (view, error) in outcome.failed {
        warn!(view = %view, error = %error, "View refresh failed");
        if !every_view {
            if let Some(group) = grouped.remove(view.design()) {
                report
                    .unconfirmed
                    .extend(group.into_iter().filter(|sibling| *sibling != view));
            }
        }
        report.failed.push((view, error));
    }
    report.failed.sort_by(|a, b| a.0.cmp(&b.0));
    report.unconfirmed.sort();

    report
}
