//! In-process CouchDB stand-in used by unit tests
//!
//! Implements just enough of the CouchDB HTTP API for the client,
//! registry, reconciliation and view refresh tests, and records every
//! request it receives.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::client::{parse_host, CouchClient};

const REPLICATOR_DB: &str = "_replicator";

#[derive(Default)]
struct Inner {
    databases: Vec<String>,
    /// db -> design doc name -> view names
    design_docs: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// (db, doc id) -> stored body, including `_id` and `_rev`
    documents: BTreeMap<(String, String), Value>,
    failing_views: HashSet<String>,
    failing_deletes: HashSet<String>,
    conflicting_puts: HashSet<String>,
    manual_trigger: bool,
    replicator_missing: bool,
    active_tasks: Vec<Value>,
    requests: Vec<(Method, String)>,
    puts: Vec<(String, Value)>,
    last_authorization: Option<String>,
    rev_counter: u64,
}

impl Inner {
    fn next_rev(&mut self, previous: Option<&str>) -> String {
        self.rev_counter += 1;
        let generation = previous
            .and_then(|rev| rev.split('-').next())
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        format!("{}-{:08x}", generation, self.rev_counter)
    }
}

type Shared = Arc<Mutex<Inner>>;

/// Handle to a running fake server
pub(crate) struct FakeCouch {
    addr: SocketAddr,
    state: Shared,
}

impl FakeCouch {
    /// Bind to an ephemeral port and start serving
    pub(crate) async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(Inner::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake couch");
        let addr = listener.local_addr().expect("fake couch address");

        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn client(&self) -> CouchClient {
        CouchClient::new(&self.url()).expect("client for fake couch")
    }

    pub(crate) fn client_with_credentials(&self, user: &str, password: &str) -> CouchClient {
        let host = parse_host(&format!("http://{}:{}@{}", user, password, self.addr))
            .expect("fake couch host");
        CouchClient::with_settings(host, std::time::Duration::from_secs(5), false)
            .expect("client for fake couch")
    }

    pub(crate) async fn add_database(&self, name: &str) {
        self.state.lock().await.databases.push(name.to_string());
    }

    pub(crate) async fn add_design_doc(&self, db: &str, name: &str, views: &[&str]) {
        let mut inner = self.state.lock().await;
        inner
            .design_docs
            .entry(db.to_string())
            .or_default()
            .insert(name.to_string(), views.iter().map(|v| v.to_string()).collect());
    }

    /// Store a document as-is and return its revision
    pub(crate) async fn add_document(&self, db: &str, id: &str, mut body: Value) -> String {
        let mut inner = self.state.lock().await;
        let rev = inner.next_rev(None);
        body["_id"] = json!(id);
        body["_rev"] = json!(rev);
        inner.documents.insert((db.to_string(), id.to_string()), body);
        rev
    }

    /// Store a replication document the way the server reports it back
    pub(crate) async fn add_replicator_doc(
        &self,
        id: &str,
        source: &str,
        target: &str,
        state: Option<&str>,
    ) -> String {
        let mut body = json!({
            "source": source,
            "target": target,
            "continuous": false,
            "create_target": false,
            "user_ctx": { "name": "admin", "roles": ["_admin"] },
        });
        if let Some(state) = state {
            body["_replication_state"] = json!(state);
            body["_replication_state_time"] = json!("2026-10-18T09:30:00+00:00");
            body["_replication_id"] = json!(format!("r-{}", id));
        }
        self.add_document(REPLICATOR_DB, id, body).await
    }

    pub(crate) async fn set_replication_state(&self, id: &str, state: &str) {
        let mut inner = self.state.lock().await;
        if let Some(doc) = inner
            .documents
            .get_mut(&(REPLICATOR_DB.to_string(), id.to_string()))
        {
            doc["_replication_state"] = json!(state);
        }
    }

    pub(crate) async fn fail_view(&self, db: &str, design: &str, view: &str) {
        self.state
            .lock()
            .await
            .failing_views
            .insert(format!("{}/{}/{}", db, design, view));
    }

    pub(crate) async fn fail_delete(&self, id: &str) {
        self.state.lock().await.failing_deletes.insert(id.to_string());
    }

    pub(crate) async fn conflict_on_put(&self, id: &str) {
        self.state.lock().await.conflicting_puts.insert(id.to_string());
    }

    /// Leave new replication docs without a state instead of marking them triggered
    /// Answer 404 for the `_replicator` listing
    pub(crate) async fn remove_replicator_db(&self) {
        self.state.lock().await.replicator_missing = true;
    }

    pub(crate) async fn trigger_manually(&self) {
        self.state.lock().await.manual_trigger = true;
    }

    pub(crate) async fn add_active_task(&self, task: Value) {
        self.state.lock().await.active_tasks.push(task);
    }

    pub(crate) async fn requests(&self) -> Vec<(Method, String)> {
        self.state.lock().await.requests.clone()
    }

    /// Request paths for one verb
    pub(crate) async fn paths(&self, method: Method) -> Vec<String> {
        self.requests()
            .await
            .into_iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, path)| path)
            .collect()
    }

    /// Bodies of every PUT, with the request path
    pub(crate) async fn puts(&self) -> Vec<(String, Value)> {
        self.state.lock().await.puts.clone()
    }

    pub(crate) async fn document(&self, db: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .documents
            .get(&(db.to_string(), id.to_string()))
            .cloned()
    }

    pub(crate) async fn replicator_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .documents
            .keys()
            .filter(|(db, _)| db == REPLICATOR_DB)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub(crate) async fn last_authorization(&self) -> Option<String> {
        self.state.lock().await.last_authorization.clone()
    }
}

fn error(status: StatusCode, error: &str, reason: &str) -> Response {
    (status, Json(json!({ "error": error, "reason": reason }))).into_response()
}

fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "not_found", "missing")
}

fn conflict() -> Response {
    error(StatusCode::CONFLICT, "conflict", "Document update conflict.")
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let segments: Vec<String> = uri
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect();
    let segs: Vec<&str> = segments.iter().map(String::as_str).collect();

    let mut inner = state.lock().await;
    inner.requests.push((method.clone(), segments.join("/")));
    inner.last_authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match (method.as_str(), segs.as_slice()) {
        ("GET", []) => Json(json!({
            "couchdb": "Welcome",
            "version": "3.3.3",
            "uuid": "0a959b9b8227188afc2ac26ccdf345a6",
            "vendor": { "name": "The Apache Software Foundation" },
        }))
        .into_response(),

        ("GET", ["_all_dbs"]) => Json(json!(inner.databases)).into_response(),

        ("GET", ["_session"]) => Json(json!({
            "ok": true,
            "userCtx": { "name": "admin", "roles": ["_admin"] },
            "info": { "authentication_handlers": ["cookie", "default"] },
        }))
        .into_response(),

        ("GET", ["_active_tasks"]) => Json(json!(inner.active_tasks)).into_response(),

        ("GET", ["_stats", ..]) => Json(json!({
            "couchdb": {
                "request_time": {
                    "description": "length of a request inside CouchDB without MochiWeb",
                    "current": 42.5, "sum": 42.5, "mean": 1.2,
                    "stddev": 0.4, "min": 0.5, "max": 9.0,
                },
            },
            "httpd": {
                "requests": {
                    "description": "number of HTTP requests",
                    "current": 35.0, "sum": 35.0, "mean": 0.0,
                    "stddev": 0.0, "min": 0.0, "max": 35.0,
                },
            },
        }))
        .into_response(),

        ("GET", [REPLICATOR_DB, "_all_docs"]) => {
            if inner.replicator_missing {
                return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
            }
            let mut rows = vec![json!({
                "id": "_design/_replicator",
                "key": "_design/_replicator",
                "value": { "rev": "1-5bfa2c99eefe2b2eb4962db13aa3cf14" },
                "doc": {
                    "_id": "_design/_replicator",
                    "_rev": "1-5bfa2c99eefe2b2eb4962db13aa3cf14",
                    "validate_doc_update": "function(newDoc, oldDoc, userCtx) {}",
                },
            })];
            for ((db, id), doc) in &inner.documents {
                if db == REPLICATOR_DB {
                    rows.push(json!({
                        "id": id,
                        "key": id,
                        "value": { "rev": doc["_rev"] },
                        "doc": doc,
                    }));
                }
            }
            Json(json!({ "total_rows": rows.len(), "offset": 0, "rows": rows })).into_response()
        }

        ("GET", [db, "_all_docs"]) => {
            if !inner.databases.iter().any(|d| d == db) {
                return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
            }
            let rows: Vec<Value> = inner
                .design_docs
                .get(*db)
                .map(|docs| {
                    docs.iter()
                        .map(|(name, views)| {
                            let id = format!("_design/{}", name);
                            let views: serde_json::Map<String, Value> = views
                                .iter()
                                .map(|v| (v.clone(), json!({ "map": "function(doc) { emit(doc._id); }" })))
                                .collect();
                            json!({
                                "id": id,
                                "key": id,
                                "value": { "rev": "1-967a00dff5e02add41819138abb3284d" },
                                "doc": { "_id": id, "language": "javascript", "views": views },
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            Json(json!({ "total_rows": rows.len(), "offset": 0, "rows": rows })).into_response()
        }

        ("HEAD", [db, "_design", design, "_view", view]) => {
            if params.get("stale").map(String::as_str) != Some("update_after") {
                return StatusCode::BAD_REQUEST.into_response();
            }
            if inner.failing_views.contains(&format!("{}/{}/{}", db, design, view)) {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            let exists = inner
                .design_docs
                .get(*db)
                .and_then(|docs| docs.get(*design))
                .map(|views| views.iter().any(|v| v == view))
                .unwrap_or(false);
            if exists {
                StatusCode::OK.into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }

        ("GET", [db, rest @ ..]) if !rest.is_empty() => {
            let key = (db.to_string(), rest.join("/"));
            match inner.documents.get(&key) {
                Some(doc) => Json(doc.clone()).into_response(),
                None => not_found(),
            }
        }

        ("PUT", [db, rest @ ..]) if !rest.is_empty() => {
            let id = rest.join("/");
            let mut doc: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
            inner.puts.push((segments.join("/"), doc.clone()));

            if inner.conflicting_puts.contains(&id) {
                return conflict();
            }

            let key = (db.to_string(), id.clone());
            let current = inner
                .documents
                .get(&key)
                .and_then(|d| d["_rev"].as_str())
                .map(str::to_string);
            let supplied = params
                .get("rev")
                .cloned()
                .or_else(|| doc["_rev"].as_str().map(str::to_string));
            if current != supplied {
                return conflict();
            }

            let rev = inner.next_rev(current.as_deref());
            doc["_id"] = json!(id);
            doc["_rev"] = json!(rev);
            if *db == REPLICATOR_DB && !inner.manual_trigger {
                doc["_replication_state"] = json!("triggered");
                doc["_replication_id"] = json!(format!("r-{}", id));
            }
            inner.documents.insert(key, doc);

            (StatusCode::CREATED, Json(json!({ "ok": true, "id": id, "rev": rev }))).into_response()
        }

        ("DELETE", [db, rest @ ..]) if !rest.is_empty() => {
            let id = rest.join("/");
            if inner.failing_deletes.contains(&id) {
                return error(StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error", "boom");
            }
            let key = (db.to_string(), id.clone());
            let current = match inner.documents.get(&key) {
                Some(doc) => doc["_rev"].as_str().map(str::to_string),
                None => return not_found(),
            };
            if current.as_ref() != params.get("rev") {
                return conflict();
            }
            inner.documents.remove(&key);
            let rev = inner.next_rev(current.as_deref());
            Json(json!({ "ok": true, "id": id, "rev": rev })).into_response()
        }

        _ => not_found(),
    }
}
