use crate::error::{TablesError, TablesResult};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Credential types supported by the Azure Data Tables SDK.
///
/// Request signing with an account key is not performed by this crate;
/// use a SAS token or a pre-acquired bearer token instead.
#[derive(Clone)]
pub enum TableCredential {
    /// Shared access signature appended to every request URL.
    SasToken(SecretString),

    /// Microsoft Entra ID access token sent as `Authorization: Bearer`.
    BearerToken(SecretString),

    /// No authentication (public tables, local emulators behind a proxy).
    Anonymous,
}

impl TableCredential {
    /// Create a credential from the environment.
    ///
    /// Checks `AZURE_TABLES_SAS_TOKEN`, then `AZURE_TABLES_TOKEN`, and falls
    /// back to [`TableCredential::Anonymous`] when neither is set.
    ///
    /// # Errors
    ///
    /// Returns [`TablesError::Auth`] if a variable is set but blank.
    pub fn from_env() -> TablesResult<Self> {
        if let Some(sas) = env_secret("AZURE_TABLES_SAS_TOKEN")? {
            return Ok(Self::sas_token(sas));
        }
        match env_secret("AZURE_TABLES_TOKEN")? {
            Some(token) => Ok(Self::bearer_token(token)),
            None => Ok(Self::Anonymous),
        }
    }

    /// Create a SAS credential. A leading `?` is ignored.
    pub fn sas_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.strip_prefix('?').map(str::to_string).unwrap_or(token);
        Self::SasToken(SecretString::from(token))
    }

    /// Create a bearer token credential.
    pub fn bearer_token(token: impl Into<String>) -> Self {
        Self::BearerToken(SecretString::from(token.into()))
    }

    /// Resolve the credential to an `Authorization` header value, if any.
    pub fn authorization(&self) -> Option<String> {
        match self {
            Self::BearerToken(token) => Some(format!("Bearer {}", token.expose_secret())),
            Self::SasToken(_) | Self::Anonymous => None,
        }
    }

    /// Return `url` with the SAS query appended when this is a SAS credential.
    pub fn authorize_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        if let Self::SasToken(sas) = self {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => {
                    format!("{existing}&{}", sas.expose_secret())
                }
                _ => sas.expose_secret().to_string(),
            };
            url.set_query(Some(&query));
        }
        url
    }
}

fn env_secret(name: &str) -> TablesResult<Option<String>> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => {
            Err(TablesError::Auth(format!("{name} is set but empty")))
        }
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(None),
    }
}

impl std::fmt::Debug for TableCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SasToken(_) => write!(f, "TableCredential::SasToken(****)"),
            Self::BearerToken(_) => write!(f, "TableCredential::BearerToken(****)"),
            Self::Anonymous => write!(f, "TableCredential::Anonymous"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn bearer_token_resolves_authorization_header() {
        let credential = TableCredential::bearer_token("abc123");
        assert_eq!(credential.authorization().as_deref(), Some("Bearer abc123"));
    }

    #[test]
    fn sas_token_has_no_authorization_header() {
        let credential = TableCredential::sas_token("sv=2019-02-02&sig=xyz");
        assert!(credential.authorization().is_none());
    }

    #[test]
    fn sas_token_is_appended_to_url() {
        let credential = TableCredential::sas_token("?sv=2019-02-02&sig=xyz");
        let url = Url::parse("https://acct.table.core.windows.net/people").unwrap();

        assert_eq!(
            credential.authorize_url(&url).as_str(),
            "https://acct.table.core.windows.net/people?sv=2019-02-02&sig=xyz"
        );
    }

    #[test]
    fn sas_token_extends_existing_query() {
        let credential = TableCredential::sas_token("sig=xyz");
        let url = Url::parse("https://acct.table.core.windows.net/people?$top=1").unwrap();

        assert_eq!(
            credential.authorize_url(&url).query(),
            Some("$top=1&sig=xyz")
        );
    }

    #[test]
    fn anonymous_leaves_url_untouched() {
        let url = Url::parse("https://acct.table.core.windows.net/people").unwrap();
        assert_eq!(TableCredential::Anonymous.authorize_url(&url), url);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let credential = TableCredential::bearer_token("super-secret");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    #[serial]
    fn from_env_prefers_sas_token() {
        std::env::set_var("AZURE_TABLES_SAS_TOKEN", "sig=from-env");
        std::env::set_var("AZURE_TABLES_TOKEN", "token-from-env");

        let credential = TableCredential::from_env().expect("should resolve");
        assert!(matches!(credential, TableCredential::SasToken(_)));

        std::env::remove_var("AZURE_TABLES_SAS_TOKEN");
        std::env::remove_var("AZURE_TABLES_TOKEN");
    }

    #[test]
    #[serial]
    fn from_env_falls_back_to_anonymous() {
        std::env::remove_var("AZURE_TABLES_SAS_TOKEN");
        std::env::remove_var("AZURE_TABLES_TOKEN");

        let credential = TableCredential::from_env().expect("should resolve");
        assert!(matches!(credential, TableCredential::Anonymous));
    }

    #[test]
    #[serial]
    fn from_env_rejects_blank_token() {
        std::env::remove_var("AZURE_TABLES_SAS_TOKEN");
        std::env::set_var("AZURE_TABLES_TOKEN", "  ");

        let err = TableCredential::from_env().unwrap_err();
        assert!(matches!(err, TablesError::Auth(ref msg) if msg.contains("AZURE_TABLES_TOKEN")));

        std::env::remove_var("AZURE_TABLES_TOKEN");
    }
}
