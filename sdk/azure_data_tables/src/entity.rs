//! Single-entity operations.
//!
//! Each function sends one request outside any transaction. Payloads are
//! serialized JSON objects carrying `PartitionKey` and `RowKey`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use azure_data_tables::entity;
//! use azure_data_tables::request::UpdateMode;
//! # use azure_data_tables_core::client::TableServiceClient;
//!
//! # async fn example(client: &TableServiceClient) -> azure_data_tables_core::TablesResult<()> {
//! let created = entity::add(client, "people", r#"{"PartitionKey":"p","RowKey":"1","Age":3}"#).await?;
//!
//! let current = entity::get(client, "people", "p", "1").await?;
//! let value: serde_json::Value = current.json()?;
//! println!("age = {}", value["Age"]);
//!
//! // Only succeeds if nobody changed the entity since it was added.
//! entity::update(
//!     client,
//!     "people",
//!     r#"{"PartitionKey":"p","RowKey":"1","Age":4}"#,
//!     UpdateMode::Merge,
//!     created.etag.as_deref(),
//! )
//! .await?;
//!
//! entity::delete(client, "people", "p", "1", None).await?;
//! # Ok(())
//! # }
//! ```

use azure_data_tables_core::client::TableServiceClient;
use azure_data_tables_core::error::TablesResult;
use azure_data_tables_core::models::{
    RawResponse, TableRequest, ACCEPT_MINIMAL_METADATA, DATA_SERVICE_VERSION,
};
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::request::{entity_url, keyed_request, ActionKind, EntityKeys, UpdateMode};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// The result of a single-entity operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityResponse {
    /// Version tag of the entity after the operation, when the service sent one.
    pub etag: Option<String>,
    /// The serialized entity. Only [`get`] returns one.
    pub value: Option<Bytes>,
}

impl EntityResponse {
    fn from_raw(response: RawResponse, with_value: bool) -> Self {
        Self {
            etag: response.etag().map(str::to_string),
            value: with_value.then_some(response.body),
        }
    }

    /// Deserialize the returned entity.
    ///
    /// An operation that returned no entity deserializes as JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> TablesResult<T> {
        let value = self.value.as_deref().unwrap_or(b"null");
        Ok(serde_json::from_slice(value)?)
    }
}

// ---------------------------------------------------------------------------
// API functions
// ---------------------------------------------------------------------------

/// Insert a new entity.
///
/// # Errors
///
/// Fails with [`TablesError::Api`] (`EntityAlreadyExists`) if the entity is
/// already present.
///
/// [`TablesError::Api`]: azure_data_tables_core::TablesError::Api
#[tracing::instrument(name = "tables::entity::add", skip(client, entity), fields(table = %table))]
pub async fn add(
    client: &TableServiceClient,
    table: &str,
    entity: impl Into<Bytes>,
) -> TablesResult<EntityResponse> {
    send_write(client, table, ActionKind::Add, entity.into(), None).await
}

/// Fetch one entity by its identity.
///
/// # Errors
///
/// Fails with [`TablesError::Api`] (`ResourceNotFound`) if no such entity
/// exists.
///
/// [`TablesError::Api`]: azure_data_tables_core::TablesError::Api
#[tracing::instrument(name = "tables::entity::get", skip(client), fields(table = %table))]
pub async fn get(
    client: &TableServiceClient,
    table: &str,
    partition_key: &str,
    row_key: &str,
) -> TablesResult<EntityResponse> {
    let keys = EntityKeys::new(partition_key, row_key);
    let request = TableRequest::new(Method::GET, entity_url(client.endpoint(), table, &keys)?)
        .with_header("Accept", ACCEPT_MINIMAL_METADATA)
        .with_header("DataServiceVersion", DATA_SERVICE_VERSION);

    let response = client.send(&request).await?;
    tracing::debug!(bytes = response.body.len(), "entity fetched");
    Ok(EntityResponse::from_raw(response, true))
}

/// Update an existing entity.
///
/// `etag` makes the update conditional; `None` matches any version.
#[tracing::instrument(
    name = "tables::entity::update",
    skip(client, entity, etag),
    fields(table = %table, mode = ?mode)
)]
pub async fn update(
    client: &TableServiceClient,
    table: &str,
    entity: impl Into<Bytes>,
    mode: UpdateMode,
    etag: Option<&str>,
) -> TablesResult<EntityResponse> {
    send_write(client, table, mode.update_kind(), entity.into(), etag).await
}

/// Update an entity, inserting it if it does not exist.
#[tracing::instrument(
    name = "tables::entity::upsert",
    skip(client, entity),
    fields(table = %table, mode = ?mode)
)]
pub async fn upsert(
    client: &TableServiceClient,
    table: &str,
    entity: impl Into<Bytes>,
    mode: UpdateMode,
) -> TablesResult<EntityResponse> {
    send_write(client, table, mode.upsert_kind(), entity.into(), None).await
}

/// Delete an entity.
///
/// `etag` makes the delete conditional; `None` matches any version.
#[tracing::instrument(name = "tables::entity::delete", skip(client, etag), fields(table = %table))]
pub async fn delete(
    client: &TableServiceClient,
    table: &str,
    partition_key: &str,
    row_key: &str,
    etag: Option<&str>,
) -> TablesResult<()> {
    let keys = EntityKeys::new(partition_key, row_key);
    let request = keyed_request(
        client.endpoint(),
        table,
        ActionKind::Delete,
        &keys,
        None,
        etag,
    )?;

    client.send(&request).await?;
    tracing::debug!("entity deleted");
    Ok(())
}

async fn send_write(
    client: &TableServiceClient,
    table: &str,
    kind: ActionKind,
    entity: Bytes,
    etag: Option<&str>,
) -> TablesResult<EntityResponse> {
    let keys = EntityKeys::from_payload(&entity)?;
    let request = keyed_request(client.endpoint(), table, kind, &keys, Some(&entity), etag)?;

    let response = client.send(&request).await?;
    tracing::debug!(%kind, status = response.status.as_u16(), "entity written");
    Ok(EntityResponse::from_raw(response, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{entity_json, setup_mock_client};
    use azure_data_tables_core::TablesError;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENTITY_PATH: &str = "/people(PartitionKey='p',RowKey='1')";

    #[tokio::test]
    async fn add_posts_to_table() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("POST"))
            .and(path("/people"))
            .and(header("Prefer", "return-no-content"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(serde_json::json!({
                "PartitionKey": "p",
                "RowKey": "1",
                "Name": "test"
            })))
            .respond_with(ResponseTemplate::new(204).insert_header("ETag", "W/\"v1\""))
            .expect(1)
            .mount(&server)
            .await;

        let response = add(&client, "people", entity_json("p", "1"))
            .await
            .expect("should add");

        assert_eq!(response.etag.as_deref(), Some("W/\"v1\""));
        assert!(response.value.is_none());
    }

    #[tokio::test]
    async fn add_conflict_is_api_error() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("POST"))
            .and(path("/people"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "odata.error": {
                    "code": "EntityAlreadyExists",
                    "message": {"lang": "en-US", "value": "The specified entity already exists."}
                }
            })))
            .mount(&server)
            .await;

        let err = add(&client, "people", entity_json("p", "1")).await.unwrap_err();
        match err {
            TablesError::Api { code, .. } => assert_eq!(code, "EntityAlreadyExists"),
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn add_without_partition_key_is_never_sent() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let err = add(&client, "people", r#"{"RowKey":"1"}"#).await.unwrap_err();
        assert!(matches!(
            err,
            TablesError::MissingEntityKey {
                field: "PartitionKey"
            }
        ));
    }

    #[tokio::test]
    async fn get_returns_value_and_etag() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("GET"))
            .and(path(ENTITY_PATH))
            .and(header("Accept", ACCEPT_MINIMAL_METADATA))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "W/\"v2\"")
                    .set_body_json(serde_json::json!({
                        "PartitionKey": "p",
                        "RowKey": "1",
                        "Age": 3
                    })),
            )
            .mount(&server)
            .await;

        let response = get(&client, "people", "p", "1").await.expect("should get");

        assert_eq!(response.etag.as_deref(), Some("W/\"v2\""));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["Age"], 3);
    }

    #[tokio::test]
    async fn get_missing_entity_is_api_error() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "odata.error": {
                    "code": "ResourceNotFound",
                    "message": {"value": "The specified resource does not exist."}
                }
            })))
            .mount(&server)
            .await;

        let err = get(&client, "people", "p", "1").await.unwrap_err();
        assert!(matches!(err, TablesError::Api { ref code, .. } if code == "ResourceNotFound"));
    }

    #[tokio::test]
    async fn update_merge_sends_merge_with_etag() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("MERGE"))
            .and(path(ENTITY_PATH))
            .and(header("If-Match", "W/\"v1\""))
            .respond_with(ResponseTemplate::new(204).insert_header("ETag", "W/\"v2\""))
            .expect(1)
            .mount(&server)
            .await;

        let response = update(
            &client,
            "people",
            entity_json("p", "1"),
            UpdateMode::Merge,
            Some("W/\"v1\""),
        )
        .await
        .expect("should update");

        assert_eq!(response.etag.as_deref(), Some("W/\"v2\""));
    }

    #[tokio::test]
    async fn update_replace_defaults_to_match_any() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("PUT"))
            .and(path(ENTITY_PATH))
            .and(header("If-Match", "*"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        update(&client, "people", entity_json("p", "1"), UpdateMode::Replace, None)
            .await
            .expect("should update");
    }

    #[tokio::test]
    async fn upsert_omits_if_match() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("PUT"))
            .and(path(ENTITY_PATH))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        upsert(&client, "people", entity_json("p", "1"), UpdateMode::Replace)
            .await
            .expect("should upsert");

        let received = server.received_requests().await.unwrap();
        assert!(!received[0].headers.contains_key("if-match"));
    }

    #[tokio::test]
    async fn delete_defaults_to_match_any() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("DELETE"))
            .and(path(ENTITY_PATH))
            .and(header("If-Match", "*"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        delete(&client, "people", "p", "1", None)
            .await
            .expect("should delete");
    }

    #[tokio::test]
    async fn keys_with_quotes_are_escaped() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("DELETE"))
            .and(path("/people(PartitionKey='o''brien',RowKey='1')"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        delete(&client, "people", "o'brien", "1", None)
            .await
            .expect("should delete");
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn get_emits_span() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let _ = get(&client, "people", "p", "1").await;

        assert!(logs_contain("tables::entity::get"));
    }
}
