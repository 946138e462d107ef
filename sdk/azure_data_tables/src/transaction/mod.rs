//! Transactional batches.
//!
//! A transaction applies an ordered list of entity writes atomically: either
//! every action is committed or none is. All actions must target the same
//! partition of one table; the service enforces this and rejects the batch
//! otherwise.
//!
//! ## Example
//!
//! ```rust,no_run
//! use azure_data_tables::transaction::{self, BatchIds};
//! use azure_data_tables::request::TransactionAction;
//! # use azure_data_tables_core::client::TableServiceClient;
//!
//! # async fn example(client: &TableServiceClient) -> azure_data_tables_core::TablesResult<()> {
//! let actions = vec![
//!     TransactionAction::add(r#"{"PartitionKey":"tenants","RowKey":"1","Name":"a"}"#),
//!     TransactionAction::add(r#"{"PartitionKey":"tenants","RowKey":"2","Name":"b"}"#),
//!     TransactionAction::delete(r#"{"PartitionKey":"tenants","RowKey":"0"}"#),
//! ];
//!
//! match transaction::submit(client, "people", &actions, &BatchIds::random()).await {
//!     Ok(result) => println!("{} actions committed", result.responses.len()),
//!     Err(azure_data_tables_core::TablesError::Transaction(e)) => {
//!         println!("action {:?} failed: {}", e.failed_index, e.code)
//!     }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod decode;
pub mod encode;
pub mod error;

pub use boundary::{BatchIds, Boundaries};
pub use decode::decode_response;
pub use encode::{encode_batch, encode_changeset, encode_transaction, EncodedBatch, PreparedTransaction};
pub use error::extract_transaction_error;

use azure_data_tables_core::client::TableServiceClient;
use azure_data_tables_core::error::TablesResult;
use azure_data_tables_core::models::{
    RawResponse, TableRequest, ACCEPT_MINIMAL_METADATA, DATA_SERVICE_VERSION,
};
use reqwest::{Method, StatusCode};

use crate::request::TransactionAction;

/// The outcome of a committed transaction.
#[derive(Debug, Clone)]
pub struct TransactionResponse {
    /// Status of the batch request itself (normally `202 Accepted`).
    pub status: StatusCode,
    /// One response per action, in submission order.
    pub responses: Vec<RawResponse>,
}

/// Submit a transaction against `table`.
///
/// `ids` supplies the MIME boundary identifiers; use [`BatchIds::random`]
/// unless reproducible request bytes are needed.
///
/// # Errors
///
/// - Construction errors ([`EmptyTransaction`], [`MissingEntityKey`],
///   [`Builder`]) before anything is sent.
/// - [`Transaction`] when the service rejects the batch or one of its
///   actions; `failed_index` names the action when the service reports it.
/// - [`MalformedResponse`] when the response cannot be decoded.
/// - Transport errors from [`TableServiceClient::execute`].
///
/// [`EmptyTransaction`]: azure_data_tables_core::TablesError::EmptyTransaction
/// [`MissingEntityKey`]: azure_data_tables_core::TablesError::MissingEntityKey
/// [`Builder`]: azure_data_tables_core::TablesError::Builder
/// [`Transaction`]: azure_data_tables_core::TablesError::Transaction
/// [`MalformedResponse`]: azure_data_tables_core::TablesError::MalformedResponse
///
/// # Tracing
///
/// Emits a span named `tables::transaction::submit` with fields `table`
/// and `actions`.
#[tracing::instrument(
    name = "tables::transaction::submit",
    skip(client, actions, ids),
    fields(table = %table, actions = actions.len())
)]
pub async fn submit(
    client: &TableServiceClient,
    table: &str,
    actions: &[TransactionAction],
    ids: &BatchIds,
) -> TablesResult<TransactionResponse> {
    tracing::debug!("encoding transaction");

    let PreparedTransaction { batch, requests } =
        encode_transaction(client.endpoint(), table, actions, ids)?;
    let (body, content_type) = batch.into_parts();

    let request = TableRequest::new(Method::POST, client.url("$batch")?)
        .with_header("Content-Type", content_type)
        .with_header("Accept", ACCEPT_MINIMAL_METADATA)
        .with_header("DataServiceVersion", DATA_SERVICE_VERSION)
        .with_body(body);

    let response = client.execute(&request).await?;
    tracing::debug!(
        status = response.status.as_u16(),
        bytes = response.body.len(),
        "batch response received"
    );

    let responses = decode_response(response.status, &response.body, &requests)?;

    tracing::debug!(count = responses.len(), "transaction committed");
    Ok(TransactionResponse {
        status: response.status,
        responses,
    })
}
