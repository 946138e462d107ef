//! Helpers for sibling crates' tests. Enabled by the `test-support` feature.

use crate::auth::TableCredential;
use crate::client::{RetryPolicy, TableServiceClient};
use std::time::Duration;
use wiremock::MockServer;

/// Bearer token used by mock clients (not a real token).
pub const TEST_TOKEN: &str = "test-token";

/// Create a client pointed at a mock server, with near-instant retries.
pub fn mock_client(server: &MockServer) -> TableServiceClient {
    TableServiceClient::builder()
        .endpoint(server.uri())
        .credential(TableCredential::bearer_token(TEST_TOKEN))
        .retry_policy(RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
        })
        .build()
        .expect("should build client")
}
