//! Table management: creation, deletion, and stored access policies.

use azure_data_tables_core::client::TableServiceClient;
use azure_data_tables_core::error::{TablesError, TablesResult};
use azure_data_tables_core::models::{
    TableRequest, ACCEPT_MINIMAL_METADATA, CONTENT_TYPE_JSON, DATA_SERVICE_VERSION,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::request::{endpoint_segment, table_url};

const TABLES_SEGMENT: &str = "Tables";

/// The service stores at most this many access policies per table.
pub const MAX_SIGNED_IDENTIFIERS: usize = 5;

/// Longest allowed signed identifier id.
const MAX_SIGNED_IDENTIFIER_ID_LEN: usize = 64;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

#[derive(Debug, Serialize)]
struct TableProperties<'a> {
    #[serde(rename = "TableName")]
    table_name: &'a str,
}

// ---------------------------------------------------------------------------
// Access policy types
// ---------------------------------------------------------------------------

/// A stored access policy that SAS tokens can reference by `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedIdentifier {
    /// Unique id of the policy, at most 64 characters.
    #[serde(rename = "Id")]
    pub id: String,

    #[serde(rename = "AccessPolicy", skip_serializing_if = "Option::is_none", default)]
    pub access_policy: Option<AccessPolicy>,
}

/// Validity window and permissions of a stored access policy.
///
/// Times are ISO 8601 UTC strings as the service writes them, e.g.
/// `2024-01-01T00:00:00.0000000Z`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(rename = "Start", skip_serializing_if = "Option::is_none", default)]
    pub start: Option<String>,

    #[serde(rename = "Expiry", skip_serializing_if = "Option::is_none", default)]
    pub expiry: Option<String>,

    /// Abbreviated permission list, e.g. `raud`.
    #[serde(rename = "Permission", skip_serializing_if = "Option::is_none", default)]
    pub permission: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "SignedIdentifiers")]
struct SignedIdentifiers {
    #[serde(rename = "SignedIdentifier", default)]
    items: Vec<SignedIdentifier>,
}

// ---------------------------------------------------------------------------
// API functions
// ---------------------------------------------------------------------------

/// Check a table name against the service's naming rules: 3 to 63
/// alphanumeric characters, starting with a letter.
///
/// # Errors
///
/// Returns [`TablesError::Builder`] describing the first rule broken.
pub fn validate_table_name(name: &str) -> TablesResult<()> {
    if !(3..=63).contains(&name.len()) {
        return Err(TablesError::Builder(format!(
            "table name `{name}` must be 3 to 63 characters"
        )));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(TablesError::Builder(format!(
            "table name `{name}` must be alphanumeric"
        )));
    }
    if !name.as_bytes()[0].is_ascii_alphabetic() {
        return Err(TablesError::Builder(format!(
            "table name `{name}` must start with a letter"
        )));
    }
    Ok(())
}

/// Create a table.
///
/// # Errors
///
/// Fails locally if the name is invalid, or with [`TablesError::Api`]
/// (`TableAlreadyExists`) if the table exists.
#[tracing::instrument(name = "tables::table::create", skip(client), fields(table = %name))]
pub async fn create(client: &TableServiceClient, name: &str) -> TablesResult<()> {
    validate_table_name(name)?;
    let body = serde_json::to_vec(&TableProperties { table_name: name })?;

    let url = endpoint_segment(client.endpoint(), TABLES_SEGMENT)?;

    let request = TableRequest::new(Method::POST, url)
        .with_header("Accept", ACCEPT_MINIMAL_METADATA)
        .with_header("Content-Type", CONTENT_TYPE_JSON)
        .with_header("DataServiceVersion", DATA_SERVICE_VERSION)
        .with_header("Prefer", "return-no-content")
        .with_body(body);

    client.send(&request).await?;
    tracing::debug!("table created");
    Ok(())
}

/// Delete a table and every entity in it.
#[tracing::instrument(name = "tables::table::delete", skip(client), fields(table = %name))]
pub async fn delete(client: &TableServiceClient, name: &str) -> TablesResult<()> {
    validate_table_name(name)?;
    let url = endpoint_segment(client.endpoint(), &format!("{TABLES_SEGMENT}('{name}')"))?;

    let request = TableRequest::new(Method::DELETE, url)
        .with_header("Accept", ACCEPT_MINIMAL_METADATA)
        .with_header("DataServiceVersion", DATA_SERVICE_VERSION);

    client.send(&request).await?;
    tracing::debug!("table deleted");
    Ok(())
}

fn acl_url(client: &TableServiceClient, name: &str) -> TablesResult<url::Url> {
    let mut url = table_url(client.endpoint(), name)?;
    url.set_query(Some("comp=acl"));
    Ok(url)
}

/// Fetch the stored access policies of a table.
///
/// # Errors
///
/// Returns [`TablesError::MalformedResponse`] if the service's XML cannot
/// be read.
#[tracing::instrument(name = "tables::table::get_access_policy", skip(client), fields(table = %name))]
pub async fn get_access_policy(
    client: &TableServiceClient,
    name: &str,
) -> TablesResult<Vec<SignedIdentifier>> {
    validate_table_name(name)?;
    let request = TableRequest::new(Method::GET, acl_url(client, name)?);

    let response = client.send(&request).await?;
    let xml = std::str::from_utf8(&response.body)
        .map_err(|e| TablesError::malformed(format!("access policy is not UTF-8: {e}")))?;
    if xml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let identifiers: SignedIdentifiers = quick_xml::de::from_str(xml)
        .map_err(|e| TablesError::malformed(format!("invalid access policy XML: {e}")))?;

    tracing::debug!(count = identifiers.items.len(), "access policy fetched");
    Ok(identifiers.items)
}

/// Replace the stored access policies of a table.
///
/// An empty slice removes every policy.
///
/// # Errors
///
/// Fails locally with [`TablesError::Builder`] if more than
/// [`MAX_SIGNED_IDENTIFIERS`] policies are given or an id is empty or longer
/// than 64 characters.
#[tracing::instrument(
    name = "tables::table::set_access_policy",
    skip(client, identifiers),
    fields(table = %name, policies = identifiers.len())
)]
pub async fn set_access_policy(
    client: &TableServiceClient,
    name: &str,
    identifiers: &[SignedIdentifier],
) -> TablesResult<()> {
    validate_table_name(name)?;
    if identifiers.len() > MAX_SIGNED_IDENTIFIERS {
        return Err(TablesError::Builder(format!(
            "at most {MAX_SIGNED_IDENTIFIERS} access policies are allowed, got {}",
            identifiers.len()
        )));
    }
    if let Some(bad) = identifiers
        .iter()
        .find(|si| si.id.is_empty() || si.id.chars().count() > MAX_SIGNED_IDENTIFIER_ID_LEN)
    {
        return Err(TablesError::Builder(format!(
            "signed identifier id `{}` must be 1 to {MAX_SIGNED_IDENTIFIER_ID_LEN} characters",
            bad.id
        )));
    }

    let document = SignedIdentifiers {
        items: identifiers.to_vec(),
    };
    let xml = quick_xml::se::to_string(&document)
        .map_err(|e| TablesError::Builder(format!("cannot serialize access policy: {e}")))?;

    let request = TableRequest::new(Method::PUT, acl_url(client, name)?)
        .with_header("Content-Type", "application/xml")
        .with_body(format!("{XML_DECLARATION}{xml}"));

    client.send(&request).await?;
    tracing::debug!("access policy set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_mock_client;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn valid_table_names() {
        for name in ["abc", "People", "orders2024", "a".repeat(63).as_str()] {
            assert!(validate_table_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_table_names() {
        for name in ["", "ab", "1abc", "my-table", "my_table", "tåble", "a".repeat(64).as_str()] {
            let err = validate_table_name(name).unwrap_err();
            assert!(matches!(err, TablesError::Builder(_)), "{name} should be invalid");
        }
    }

    #[tokio::test]
    async fn create_posts_table_name() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("POST"))
            .and(path("/Tables"))
            .and(header("Prefer", "return-no-content"))
            .and(body_json(serde_json::json!({"TableName": "people"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        create(&client, "people").await.expect("should create");
    }

    #[tokio::test]
    async fn create_existing_table_is_api_error() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("POST"))
            .and(path("/Tables"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "odata.error": {
                    "code": "TableAlreadyExists",
                    "message": {"lang": "en-US", "value": "The table specified already exists."}
                }
            })))
            .mount(&server)
            .await;

        let err = create(&client, "people").await.unwrap_err();
        assert!(matches!(err, TablesError::Api { ref code, .. } if code == "TableAlreadyExists"));
    }

    #[tokio::test]
    async fn invalid_name_is_never_sent() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        assert!(create(&client, "no-dashes").await.is_err());
    }

    #[tokio::test]
    async fn delete_addresses_table_by_key() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("DELETE"))
            .and(path("/Tables('people')"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        delete(&client, "people").await.expect("should delete");
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn create_emits_span() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let _ = create(&client, "people").await;

        assert!(logs_contain("tables::table::create"));
    }

    fn read_policy() -> SignedIdentifier {
        SignedIdentifier {
            id: "readers".into(),
            access_policy: Some(AccessPolicy {
                start: Some("2024-01-01T00:00:00.0000000Z".into()),
                expiry: Some("2024-02-01T00:00:00.0000000Z".into()),
                permission: Some("r".into()),
            }),
        }
    }

    #[tokio::test]
    async fn get_access_policy_parses_signed_identifiers() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        let xml = concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            "<SignedIdentifiers>",
            "<SignedIdentifier><Id>readers</Id><AccessPolicy>",
            "<Start>2024-01-01T00:00:00.0000000Z</Start>",
            "<Expiry>2024-02-01T00:00:00.0000000Z</Expiry>",
            "<Permission>r</Permission>",
            "</AccessPolicy></SignedIdentifier>",
            "<SignedIdentifier><Id>bare</Id></SignedIdentifier>",
            "</SignedIdentifiers>"
        );

        Mock::given(method("GET"))
            .and(path("/people"))
            .and(query_param("comp", "acl"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(xml, "application/xml"))
            .expect(1)
            .mount(&server)
            .await;

        let policies = get_access_policy(&client, "people").await.expect("should get");

        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0], read_policy());
        assert_eq!(policies[1].id, "bare");
        assert!(policies[1].access_policy.is_none());
    }

    #[tokio::test]
    async fn get_access_policy_without_policies_is_empty() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("GET"))
            .and(query_param("comp", "acl"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<SignedIdentifiers />", "application/xml"),
            )
            .mount(&server)
            .await;

        let policies = get_access_policy(&client, "people").await.expect("should get");
        assert!(policies.is_empty());
    }

    #[tokio::test]
    async fn get_access_policy_rejects_invalid_xml() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<SignedIdentifiers><Sig", "application/xml"))
            .mount(&server)
            .await;

        let err = get_access_policy(&client, "people").await.unwrap_err();
        assert!(matches!(err, TablesError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn set_access_policy_puts_xml() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("PUT"))
            .and(path("/people"))
            .and(query_param("comp", "acl"))
            .and(header("Content-Type", "application/xml"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        set_access_policy(&client, "people", &[read_policy()])
            .await
            .expect("should set");

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8(received[0].body.clone()).unwrap();
        assert!(body.starts_with(XML_DECLARATION));
        assert!(body.contains("<SignedIdentifier><Id>readers</Id>"));
        assert!(body.contains("<Permission>r</Permission>"));

        let sent: SignedIdentifiers =
            quick_xml::de::from_str(body.trim_start_matches(XML_DECLARATION)).unwrap();
        assert_eq!(sent.items, vec![read_policy()]);
    }

    #[tokio::test]
    async fn too_many_access_policies_are_never_sent() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server);

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let policies: Vec<SignedIdentifier> = (0..6)
            .map(|i| SignedIdentifier {
                id: format!("p{i}"),
                access_policy: None,
            })
            .collect();
        let err = set_access_policy(&client, "people", &policies).await.unwrap_err();
        assert!(matches!(err, TablesError::Builder(ref msg) if msg.contains("at most 5")));

        let long_id = SignedIdentifier {
            id: "x".repeat(65),
            access_policy: None,
        };
        let err = set_access_policy(&client, "people", &[long_id]).await.unwrap_err();
        assert!(matches!(err, TablesError::Builder(_)));
    }
}
