//! Request construction for entity operations.
//!
//! Every entity write, whether sent alone through [`crate::entity`] or packed
//! into a batch by [`crate::transaction`], starts life as a
//! [`TransactionAction`] and is turned into a transport-independent
//! [`TableRequest`] here.

use azure_data_tables_core::error::{TablesError, TablesResult};
use azure_data_tables_core::models::{
    TableRequest, ACCEPT_MINIMAL_METADATA, CONTENT_TYPE_JSON, DATA_SERVICE_VERSION,
};
use bytes::Bytes;
use reqwest::Method;
use url::Url;

/// Property holding an entity's partition identity.
pub const PARTITION_KEY: &str = "PartitionKey";

/// Property holding an entity's row identity.
pub const ROW_KEY: &str = "RowKey";

/// The wildcard ETag: matches any existing entity version.
pub const MATCH_ANY: &str = "*";

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// The kind of write an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Insert a new entity; fails if it already exists.
    Add,
    /// Merge properties into an existing entity.
    UpdateMerge,
    /// Replace an existing entity.
    UpdateReplace,
    /// Delete an existing entity.
    Delete,
    /// Merge into the entity, inserting it if it does not exist.
    InsertMerge,
    /// Replace the entity, inserting it if it does not exist.
    InsertReplace,
}

impl ActionKind {
    /// Returns the wire name of the action kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::UpdateMerge => "updatemerge",
            Self::UpdateReplace => "updatereplace",
            Self::Delete => "delete",
            Self::InsertMerge => "insertmerge",
            Self::InsertReplace => "insertreplace",
        }
    }

    fn method(self) -> TablesResult<Method> {
        match self {
            Self::Add => Ok(Method::POST),
            Self::UpdateReplace | Self::InsertReplace => Ok(Method::PUT),
            Self::Delete => Ok(Method::DELETE),
            Self::UpdateMerge | Self::InsertMerge => {
                Method::from_bytes(b"MERGE").map_err(|e| TablesError::Builder(e.to_string()))
            }
        }
    }

    /// Kinds that send `If-Match: *` when no token is supplied. Upserts
    /// default to no `If-Match`: its absence is what makes the service
    /// insert a missing entity.
    fn defaults_to_match_any(self) -> bool {
        matches!(self, Self::UpdateMerge | Self::UpdateReplace | Self::Delete)
    }

    fn sends_body(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an update or upsert treats properties missing from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Keep properties not present in the payload.
    #[default]
    Merge,
    /// Drop properties not present in the payload.
    Replace,
}

impl UpdateMode {
    pub(crate) fn update_kind(self) -> ActionKind {
        match self {
            Self::Merge => ActionKind::UpdateMerge,
            Self::Replace => ActionKind::UpdateReplace,
        }
    }

    pub(crate) fn upsert_kind(self) -> ActionKind {
        match self {
            Self::Merge => ActionKind::InsertMerge,
            Self::Replace => ActionKind::InsertReplace,
        }
    }
}

/// One entity operation.
///
/// `entity` is a serialized JSON object. It must contain string-valued
/// `PartitionKey` and `RowKey` properties; this is checked when the action
/// is turned into a request, before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionAction {
    pub kind: ActionKind,
    pub entity: Bytes,
    /// Concurrency token sent as `If-Match`. Without one, updates and
    /// deletes match any version and upserts are unconditional. `Add`
    /// rejects a token.
    pub etag: Option<String>,
}

impl TransactionAction {
    /// Create an action without a concurrency token.
    pub fn new(kind: ActionKind, entity: impl Into<Bytes>) -> Self {
        Self {
            kind,
            entity: entity.into(),
            etag: None,
        }
    }

    /// Set the concurrency token sent as `If-Match`.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn add(entity: impl Into<Bytes>) -> Self {
        Self::new(ActionKind::Add, entity)
    }

    pub fn update_merge(entity: impl Into<Bytes>) -> Self {
        Self::new(ActionKind::UpdateMerge, entity)
    }

    pub fn update_replace(entity: impl Into<Bytes>) -> Self {
        Self::new(ActionKind::UpdateReplace, entity)
    }

    pub fn delete(entity: impl Into<Bytes>) -> Self {
        Self::new(ActionKind::Delete, entity)
    }

    pub fn insert_merge(entity: impl Into<Bytes>) -> Self {
        Self::new(ActionKind::InsertMerge, entity)
    }

    pub fn insert_replace(entity: impl Into<Bytes>) -> Self {
        Self::new(ActionKind::InsertReplace, entity)
    }
}

// ---------------------------------------------------------------------------
// Entity identity
// ---------------------------------------------------------------------------

/// The identity of an entity within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKeys {
    pub partition_key: String,
    pub row_key: String,
}

impl EntityKeys {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }

    /// Read the identity properties from a serialized entity.
    ///
    /// # Errors
    ///
    /// Returns [`TablesError::Serialization`] if the payload is not a JSON
    /// object, or [`TablesError::MissingEntityKey`] if either identity
    /// property is absent or not a string.
    pub fn from_payload(payload: &[u8]) -> TablesResult<Self> {
        let entity: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)?;
        let key = |field: &'static str| {
            entity
                .get(field)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or(TablesError::MissingEntityKey { field })
        };

        Ok(Self {
            partition_key: key(PARTITION_KEY)?,
            row_key: key(ROW_KEY)?,
        })
    }

    /// The OData key predicate, e.g. `(PartitionKey='p',RowKey='r')`.
    pub fn predicate(&self) -> String {
        format!(
            "({PARTITION_KEY}='{}',{ROW_KEY}='{}')",
            escape_key(&self.partition_key),
            escape_key(&self.row_key)
        )
    }
}

/// Single quotes inside an OData string literal are doubled.
fn escape_key(key: &str) -> String {
    key.replace('\'', "''")
}

// ---------------------------------------------------------------------------
// URLs
// ---------------------------------------------------------------------------

/// Append one percent-encoded path segment to `endpoint`.
pub(crate) fn endpoint_segment(endpoint: &Url, segment: &str) -> TablesResult<Url> {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| TablesError::invalid_endpoint("endpoint cannot be a base URL"))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// URL of a table's entity collection: `{endpoint}/{table}`.
pub fn table_url(endpoint: &Url, table: &str) -> TablesResult<Url> {
    if table.is_empty() {
        return Err(TablesError::Builder("table name is required".into()));
    }
    endpoint_segment(endpoint, table)
}

/// URL of one entity: `{endpoint}/{table}(PartitionKey='..',RowKey='..')`.
pub fn entity_url(endpoint: &Url, table: &str, keys: &EntityKeys) -> TablesResult<Url> {
    if table.is_empty() {
        return Err(TablesError::Builder("table name is required".into()));
    }
    endpoint_segment(endpoint, &format!("{table}{}", keys.predicate()))
}

// ---------------------------------------------------------------------------
// Request builder
// ---------------------------------------------------------------------------

/// Build the request for one action against `table`.
///
/// # Errors
///
/// Fails before producing anything if the entity payload lacks its identity
/// properties or the table name is empty.
pub fn build_request(
    endpoint: &Url,
    table: &str,
    action: &TransactionAction,
) -> TablesResult<TableRequest> {
    let keys = EntityKeys::from_payload(&action.entity)?;
    keyed_request(
        endpoint,
        table,
        action.kind,
        &keys,
        Some(&action.entity),
        action.etag.as_deref(),
    )
}

/// Build the request for an action whose identity is already known.
///
/// `entity` is ignored for kinds that carry no body.
pub(crate) fn keyed_request(
    endpoint: &Url,
    table: &str,
    kind: ActionKind,
    keys: &EntityKeys,
    entity: Option<&Bytes>,
    etag: Option<&str>,
) -> TablesResult<TableRequest> {
    let url = match kind {
        ActionKind::Add => table_url(endpoint, table)?,
        _ => entity_url(endpoint, table, keys)?,
    };

    let mut request = TableRequest::new(kind.method()?, url)
        .with_header("Accept", ACCEPT_MINIMAL_METADATA)
        .with_header("DataServiceVersion", DATA_SERVICE_VERSION);

    if kind == ActionKind::Add {
        request = request.with_header("Prefer", "return-no-content");
    }
    if kind == ActionKind::Add && etag.is_some() {
        return Err(TablesError::Builder(format!(
            "{kind} cannot carry a concurrency token"
        )));
    }
    let if_match = etag.or_else(|| kind.defaults_to_match_any().then_some(MATCH_ANY));
    if let Some(if_match) = if_match {
        request = request.with_header("If-Match", if_match);
    }
    if kind.sends_body() {
        let body = entity.ok_or_else(|| {
            TablesError::Builder(format!("{kind} requires an entity payload"))
        })?;
        request = request
            .with_header("Content-Type", CONTENT_TYPE_JSON)
            .with_body(body.clone());
    }

    Ok(request)
}
