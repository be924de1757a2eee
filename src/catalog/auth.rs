//! Service-account OAuth: sign a JWT with the account's RSA key and trade it
//! for a short-lived bearer token.

use crate::error::CatalogError;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a downloaded service-account JSON key that we use.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            CatalogError::config(format!(
                "cannot read service account file {}: {err}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            CatalogError::config(format!(
                "invalid service account file {}: {err}",
                path.display()
            ))
        })
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Hands out bearer tokens, refreshing shortly before the cached one expires.
pub struct TokenSource {
    agent: ureq::Agent,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    pub fn new(agent: ureq::Agent, key: ServiceAccountKey) -> Result<Self, CatalogError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|err| {
            CatalogError::config(format!(
                "service account private key for {} is not a valid RSA key: {err}",
                key.client_email
            ))
        })?;
        Ok(Self {
            agent,
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    pub fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock();
        let now = Utc::now();
        if let Some(token) = cached.as_ref()
            && token.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
        {
            return Ok(token.value.clone());
        }

        let token = self.fetch(now)?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn fetch(&self, now: DateTime<Utc>) -> Result<AccessToken> {
        debug!("requesting access token for {}", self.key.client_email);
        let assertion = self.sign_assertion(now)?;
        let response = self
            .agent
            .post(&self.key.token_uri)
            .send_form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    anyhow!("token endpoint returned HTTP {code}: {}", body.trim())
                }
                other => anyhow!(other),
            })
            .with_context(|| format!("authorizing {}", self.key.client_email))?;
        let token: TokenResponse = response
            .into_json()
            .context("decoding token endpoint response")?;

        Ok(AccessToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("signing service account assertion")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_support::{one_shot_agent, serve};

    pub(crate) const TEST_KEY: &str = include_str!("testdata/test_key.pem");

    pub(crate) fn test_key(token_uri: &str) -> ServiceAccountKey {
        ServiceAccountKey {
            client_email: "sync@example.iam.gserviceaccount.com".into(),
            private_key: TEST_KEY.into(),
            token_uri: token_uri.into(),
        }
    }

    #[test]
    fn exchanges_signed_assertion_for_token() {
        let server = serve(vec![(
            200,
            r#"{"access_token":"ya29.test","expires_in":3599,"token_type":"Bearer"}"#.into(),
        )]);
        let tokens =
            TokenSource::new(one_shot_agent(), test_key(&format!("{}/token", server.base_url)))
                .unwrap();

        assert_eq!(tokens.access_token().unwrap(), "ya29.test");
        // Served from the cache; the stub only answers once.
        assert_eq!(tokens.access_token().unwrap(), "ya29.test");

        let requests = server.finish();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].target, "/token");
        assert!(requests[0].body.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));
        let assertion = requests[0]
            .body
            .split('&')
            .find_map(|pair| pair.strip_prefix("assertion="))
            .unwrap();
        assert_eq!(assertion.split('.').count(), 3);
    }

    #[test]
    fn rejected_credentials_surface_the_status() {
        let server = serve(vec![(400, r#"{"error":"invalid_grant"}"#.into())]);
        let tokens =
            TokenSource::new(one_shot_agent(), test_key(&format!("{}/token", server.base_url)))
                .unwrap();
        let err = tokens.access_token().unwrap_err();
        assert!(format!("{err:#}").contains("HTTP 400"));
        server.finish();
    }

    #[test]
    fn invalid_private_key_is_a_config_error() {
        let mut key = test_key("http://127.0.0.1:9/token");
        key.private_key = "not a key".into();
        let err = TokenSource::new(one_shot_agent(), key).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn key_file_defaults_token_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sa.json");
        fs::write(
            &path,
            serde_json::json!({
                "type": "service_account",
                "client_email": "a@b.iam.gserviceaccount.com",
                "private_key": "pem",
            })
            .to_string(),
        )
        .unwrap();
        let key = ServiceAccountKey::from_file(&path).unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);

        let err = ServiceAccountKey::from_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.is_fatal());
    }
}
