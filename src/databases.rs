//! Database listing and document deletion

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::{CouchClient, WriteAck};
use crate::error::{Error, Result};
use crate::resource::{Database, Document};

/// Outcome of a sequential delete run
///
/// Deletion stops at the first failure; earlier deletions are kept.
#[derive(Debug)]
pub struct DeletionReport<T> {
    pub deleted: Vec<T>,
    pub failure: Option<(T, Error)>,
}

impl<T> Default for DeletionReport<T> {
    fn default() -> Self {
        Self {
            deleted: Vec::new(),
            failure: None,
        }
    }
}

impl<T> DeletionReport<T> {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<Vec<T>> {
        match self.failure {
            Some((_, error)) => Err(error),
            None => Ok(self.deleted),
        }
    }
}

/// Databases on the client's server, sorted by name
pub async fn list_databases(client: &CouchClient) -> Result<Vec<Database>> {
    let mut names: Vec<String> = client.get(&["_all_dbs"], &[]).await?;
    names.sort();
    debug!("Server has {} databases", names.len());
    Ok(names.into_iter().map(Database::new).collect())
}

/// Databases on another server, as absolute references, sorted by name
pub async fn list_databases_on(client: &CouchClient, host: &Url) -> Result<Vec<Database>> {
    let remote = client.for_host(host);
    Ok(list_databases(&remote)
        .await?
        .into_iter()
        .map(|db| Database::on_host(host, db.name()))
        .collect())
}

#[derive(Deserialize)]
struct Revision {
    #[serde(rename = "_rev")]
    rev: String,
}

/// Delete a document at its current revision
pub async fn delete_document(client: &CouchClient, document: &Document) -> Result<()> {
    let client = document.database().client_for(client);
    let segments = document.segments();

    let current: Revision = client.get(&segments, &[]).await?;
    let ack: WriteAck = client.delete(&segments, &[("rev", current.rev.as_str())]).await?;
    if !ack.ok {
        return Err(Error::NotAcknowledged(format!("deletion of {}", document)));
    }
    info!(document = %document, "Document deleted");
    Ok(())
}

/// Delete documents one at a time, stopping at the first failure
pub async fn delete_documents(client: &CouchClient, documents: &[Document]) -> DeletionReport<Document> {
    let mut report = DeletionReport::default();
    for document in documents {
        match delete_document(client, document).await {
            Ok(()) => report.deleted.push(document.clone()),
            Err(e) => {
                report.failure = Some((document.clone(), e));
                break;
            }
        }
    }
    report
}
