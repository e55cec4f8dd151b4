//! Resource Resolver
//!
//! Typed references to databases, design documents, views and documents.
//! A reference is either relative (resolved against whatever client uses
//! it) or absolute, carrying the origin of its own server.
//!
//! Locators percent-encode every path segment and parsing decodes them,
//! so `Resource::parse(&r.locator())` always yields `r` again.

use std::fmt;

use reqwest::Url;

use crate::client::{redact, CouchClient};
use crate::error::{Error, Result};

/// Path segment introducing a design document
pub const DESIGN_MARKER: &str = "_design";

/// Path segment introducing a view inside a design document
pub const VIEW_MARKER: &str = "_view";

/// Prefix shared by server-internal databases and documents
pub const INTERNAL_PREFIX: char = '_';

/// Expected shape of a view path, used in error messages
const VIEW_SHAPE: &str = "{database}/_design/{name}/_view/{view}";

/// Strip path, query and fragment, keeping scheme, credentials, host and port
fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// Split a locator into its origin (if absolute) and decoded path segments
fn split_locator(input: &str) -> Result<(Option<Url>, Vec<String>)> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidResource("empty resource identifier".into()));
    }

    let (host, raw_path) = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        let url = Url::parse(trimmed)
            .map_err(|e| Error::InvalidResource(format!("invalid URL '{}': {}", trimmed, e)))?;
        if url.host_str().is_none() {
            return Err(Error::InvalidResource(format!("URL '{}' has no host", trimmed)));
        }
        let path = url.path().to_string();
        (Some(origin_of(&url)), path)
    } else {
        (None, trimmed.to_string())
    };

    let segments = raw_path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|c| c.into_owned())
                .map_err(|_| Error::InvalidResource(format!("'{}' is not valid UTF-8 once decoded", s)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((host, segments))
}

/// Join segments into a locator, prefixed with the origin when absolute
fn render(host: Option<&Url>, segments: &[&str], redacted: bool) -> String {
    let path = segments
        .iter()
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/");

    match host {
        Some(host) if redacted => format!("{}{}", redact(host), path),
        Some(host) => format!("{}{}", host, path),
        None => path,
    }
}

/// A database, relative to a client or on an explicit server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Database {
    host: Option<Url>,
    name: String,
}

impl Database {
    /// Database on whichever server the using client talks to
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            host: None,
            name: name.into(),
        }
    }

    /// Database on an explicit server
    pub fn on_host(host: &Url, name: impl Into<String>) -> Self {
        Self {
            host: Some(origin_of(host)),
            name: name.into(),
        }
    }

    /// Parse a database locator (`name` or `http://host:5984/name`)
    pub fn parse(input: &str) -> Result<Self> {
        match Resource::parse(input)? {
            Resource::Database(db) => Ok(db),
            other => Err(Error::InvalidResource(format!(
                "'{}' is a {}, not a database",
                input.trim(),
                other.kind()
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Origin of an absolute database
    pub fn host(&self) -> Option<&Url> {
        self.host.as_ref()
    }

    pub fn is_absolute(&self) -> bool {
        self.host.is_some()
    }

    /// Server-internal databases (`_replicator`, `_users`, ...)
    pub fn is_internal(&self) -> bool {
        self.name.starts_with(INTERNAL_PREFIX)
    }

    fn segments(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }

    /// Canonical locator, including credentials when absolute
    pub fn locator(&self) -> String {
        render(self.host.as_ref(), &self.segments(), false)
    }

    /// Absolute URL of this database as seen through `client`
    pub fn uri(&self, client: &CouchClient) -> Result<Url> {
        self.client_for(client).url(&self.segments())
    }

    /// Client for this database's server, or `fallback` when relative or same-host
    pub fn client_for(&self, fallback: &CouchClient) -> CouchClient {
        match &self.host {
            Some(host) if !fallback.is_same_host(host) => fallback.for_host(host),
            _ => fallback.clone(),
        }
    }

    /// Check whether this database lives on `client`'s server
    pub fn is_on(&self, client: &CouchClient) -> bool {
        match &self.host {
            Some(host) => client.is_same_host(host),
            None => true,
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self.host.as_ref(), &self.segments(), true))
    }
}

/// A design document inside a database
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DesignDoc {
    database: Database,
    name: String,
}

impl DesignDoc {
    pub fn new(database: Database, name: impl Into<String>) -> Self {
        Self {
            database,
            name: name.into(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Name without the `_design/` prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document id (`_design/{name}`)
    pub fn id(&self) -> String {
        format!("{}/{}", DESIGN_MARKER, self.name)
    }

    fn segments(&self) -> Vec<&str> {
        vec![self.database.name(), DESIGN_MARKER, self.name.as_str()]
    }

    pub fn locator(&self) -> String {
        render(self.database.host(), &self.segments(), false)
    }

    pub fn uri(&self, client: &CouchClient) -> Result<Url> {
        self.database.client_for(client).url(&self.segments())
    }
}

impl fmt::Display for DesignDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self.database.host(), &self.segments(), true))
    }
}

/// A view inside a design document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct View {
    design: DesignDoc,
    name: String,
}

impl View {
    pub fn new(design: DesignDoc, name: impl Into<String>) -> Self {
        Self {
            design,
            name: name.into(),
        }
    }

    /// Build a relative view from `(database, design document, view)` names
    pub fn from_components(database: &str, design: &str, view: &str) -> Result<Self> {
        for (what, value) in [("database", database), ("design document", design), ("view", view)] {
            if value.trim().is_empty() {
                return Err(Error::InvalidResource(format!("empty {} name", what)));
            }
        }
        let design = design.strip_prefix("_design/").unwrap_or(design);
        Ok(Self::new(DesignDoc::new(Database::new(database), design), view))
    }

    /// Parse a view locator, or a whitespace separated `database design view` tuple
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let is_url = trimmed.starts_with("http://") || trimmed.starts_with("https://");
        if !is_url && trimmed.contains(char::is_whitespace) {
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            return match fields.as_slice() {
                [database, design, view] => Self::from_components(database, design, view),
                _ => Err(Error::InvalidResource(format!(
                    "invalid view '{}': expected 'database design view', got {} fields",
                    trimmed,
                    fields.len()
                ))),
            };
        }

        let (host, segments) = split_locator(trimmed)?;
        Self::from_segments(host, &segments, trimmed)
    }

    fn from_segments(host: Option<Url>, segments: &[String], input: &str) -> Result<Self> {
        if segments.len() != 5 {
            return Err(Error::InvalidResource(format!(
                "invalid view path '{}': expected {}, got {} segments",
                input,
                VIEW_SHAPE,
                segments.len()
            )));
        }
        if segments[1] != DESIGN_MARKER {
            return Err(Error::InvalidResource(format!(
                "invalid view path '{}': missing '{}' marker",
                input, DESIGN_MARKER
            )));
        }
        if segments[3] != VIEW_MARKER {
            return Err(Error::InvalidResource(format!(
                "invalid view path '{}': missing '{}' marker",
                input, VIEW_MARKER
            )));
        }

        let database = match host {
            Some(host) => Database::on_host(&host, segments[0].clone()),
            None => Database::new(segments[0].clone()),
        };
        Ok(Self::new(DesignDoc::new(database, segments[2].clone()), segments[4].clone()))
    }

    pub fn design(&self) -> &DesignDoc {
        &self.design
    }

    pub fn database(&self) -> &Database {
        self.design.database()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn segments(&self) -> Vec<&str> {
        let mut segments = self.design.segments();
        segments.push(VIEW_MARKER);
        segments.push(self.name.as_str());
        segments
    }

    pub fn locator(&self) -> String {
        render(self.database().host(), &self.segments(), false)
    }

    pub fn uri(&self, client: &CouchClient) -> Result<Url> {
        self.database().client_for(client).url(&self.segments())
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self.database().host(), &self.segments(), true))
    }
}

/// Any document, addressed by database and id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Document {
    database: Database,
    id: String,
}

impl Document {
    pub fn new(database: Database, id: impl Into<String>) -> Self {
        Self {
            database,
            id: id.into(),
        }
    }

    /// Parse a document locator; the id is everything after the database
    pub fn parse(input: &str) -> Result<Self> {
        let (host, segments) = split_locator(input)?;
        if segments.len() < 2 {
            return Err(Error::InvalidResource(format!(
                "invalid document path '{}': expected {{database}}/{{id}}",
                input.trim()
            )));
        }
        let database = match host {
            Some(host) => Database::on_host(&host, segments[0].clone()),
            None => Database::new(segments[0].clone()),
        };
        Ok(Self::new(database, segments[1..].join("/")))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Design and local document ids keep their prefix as a separate segment
    pub(crate) fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.database.name()];
        match self.id.split_once('/') {
            Some((prefix, rest)) if prefix == DESIGN_MARKER || prefix == "_local" => {
                segments.push(prefix);
                segments.push(rest);
            }
            _ => segments.push(self.id.as_str()),
        }
        segments
    }

    pub fn locator(&self) -> String {
        render(self.database.host(), &self.segments(), false)
    }

    pub fn uri(&self, client: &CouchClient) -> Result<Url> {
        self.database.client_for(client).url(&self.segments())
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self.database.host(), &self.segments(), true))
    }
}

/// Any addressable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Database(Database),
    DesignDoc(DesignDoc),
    View(View),
    Document(Document),
}

impl Resource {
    /// Parse an absolute or relative locator into the resource it names
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (host, segments) = split_locator(trimmed)?;
        let database = |name: &str| match &host {
            Some(host) => Database::on_host(host, name),
            None => Database::new(name),
        };

        match segments.as_slice() {
            [] => Err(Error::InvalidResource(format!(
                "'{}' does not name a database",
                trimmed
            ))),
            [db] => Ok(Resource::Database(database(db.as_str()))),
            [db, marker, name] if marker == DESIGN_MARKER => {
                Ok(Resource::DesignDoc(DesignDoc::new(database(db.as_str()), name.clone())))
            }
            [_, marker, ..] if marker == DESIGN_MARKER => {
                View::from_segments(host.clone(), &segments, trimmed).map(Resource::View)
            }
            [db, rest @ ..] => Ok(Resource::Document(Document::new(database(db.as_str()), rest.join("/")))),
        }
    }

    /// Human readable resource kind
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Database(_) => "database",
            Resource::DesignDoc(_) => "design document",
            Resource::View(_) => "view",
            Resource::Document(_) => "document",
        }
    }

    pub fn database(&self) -> &Database {
        match self {
            Resource::Database(db) => db,
            Resource::DesignDoc(d) => d.database(),
            Resource::View(v) => v.database(),
            Resource::Document(d) => d.database(),
        }
    }

    /// Origin of an absolute resource
    pub fn host(&self) -> Option<&Url> {
        self.database().host()
    }

    pub fn locator(&self) -> String {
        match self {
            Resource::Database(db) => db.locator(),
            Resource::DesignDoc(d) => d.locator(),
            Resource::View(v) => v.locator(),
            Resource::Document(d) => d.locator(),
        }
    }

    /// Client for this resource's server, or `fallback` when relative
    pub fn client_for(&self, fallback: &CouchClient) -> CouchClient {
        self.database().client_for(fallback)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Database(db) => db.fmt(f),
            Resource::DesignDoc(d) => d.fmt(f),
            Resource::View(v) => v.fmt(f),
            Resource::Document(d) => d.fmt(f),
        }
    }
}
