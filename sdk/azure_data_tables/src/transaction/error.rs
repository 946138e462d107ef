//! Transaction failure extraction.
//!
//! The service names the failed action only inside the free-text message:
//! `{"odata.error":{"code":"..","message":{"value":"<index>:<detail>"}}}`.

use azure_data_tables_core::client::TableServiceClient;
use azure_data_tables_core::error::TransactionError;
use azure_data_tables_core::models::ODataErrorEnvelope;

/// Code used when a failure body is not an `odata.error` object.
pub const UNKNOWN_ERROR_CODE: &str = "UnknownError";

/// Build a [`TransactionError`] from a failure body.
///
/// Bodies that are not `odata.error` JSON yield [`UNKNOWN_ERROR_CODE`] with
/// the raw body as the message and no index. Messages are redacted and
/// truncated like every other service message.
pub fn extract_transaction_error(status: Option<u16>, body: &[u8]) -> TransactionError {
    match serde_json::from_slice::<ODataErrorEnvelope>(body) {
        Ok(envelope) => {
            let (failed_index, message) = split_failed_index(&envelope.error.message.value);
            TransactionError {
                status,
                code: envelope.error.code,
                message: TableServiceClient::truncate_message(message),
                failed_index,
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "failure body is not an odata.error object");
            TransactionError {
                status,
                code: UNKNOWN_ERROR_CODE.to_string(),
                message: TableServiceClient::truncate_message(&String::from_utf8_lossy(body)),
                failed_index: None,
            }
        }
    }
}

/// Split a leading `<digits>:` off `message`.
///
/// Anything else, including an index too large for `usize`, leaves the
/// message whole and the index unknown.
pub fn split_failed_index(message: &str) -> (Option<usize>, &str) {
    if let Some((prefix, rest)) = message.split_once(':') {
        if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = prefix.parse::<usize>() {
                return (Some(index), rest);
            }
        }
    }
    (None, message)
}
