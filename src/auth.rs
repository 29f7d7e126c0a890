//! OAuth2 client secrets and access-token refresh for connected mailboxes

use chrono::{Duration, Utc};
use serde::Deserialize;
use std::env;
use std::path::Path;
use yup_oauth2::ApplicationSecret;

use crate::config::OAuthConfig;
use crate::error::{Result, TriageError};
use crate::models::Credentials;

/// Gmail API scope required for reading, archiving and trashing messages
pub const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Access tokens this close to expiry are refreshed before use
pub const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Load OAuth2 client credentials from a Google client secret JSON file
pub async fn load_application_secret(path: &Path) -> Result<ApplicationSecret> {
    yup_oauth2::read_application_secret(path)
        .await
        .map_err(|e| TriageError::Auth(format!("Failed to read client secret: {}", e)))
}

/// Load OAuth2 client credentials from environment variables
///
/// # Environment Variables
/// - `GMAIL_CLIENT_ID`: OAuth2 client ID
/// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
pub fn load_credentials_from_env() -> Result<ApplicationSecret> {
    let client_id = env::var("GMAIL_CLIENT_ID")
        .map_err(|_| TriageError::Config("GMAIL_CLIENT_ID not set".to_string()))?;
    let client_secret = env::var("GMAIL_CLIENT_SECRET")
        .map_err(|_| TriageError::Config("GMAIL_CLIENT_SECRET not set".to_string()))?;

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        token_uri: "https://oauth2.googleapis.com/token".to_string(),
        ..Default::default()
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges refresh tokens for new access tokens at the OAuth token endpoint
#[derive(Clone)]
pub struct TokenRefresher {
    http: reqwest::Client,
    secret: ApplicationSecret,
    token_uri: String,
}

impl TokenRefresher {
    pub fn new(http: reqwest::Client, secret: ApplicationSecret, token_uri: impl Into<String>) -> Self {
        Self {
            http,
            secret,
            token_uri: token_uri.into(),
        }
    }

    /// Build a refresher from config. Returns `None` when no client secret is
    /// available, in which case expired tokens are used as-is and the provider
    /// decides.
    pub async fn from_config(config: &OAuthConfig, http: reqwest::Client) -> Result<Option<Self>> {
        let secret = match &config.client_secret_path {
            Some(path) => load_application_secret(path).await?,
            None => match load_credentials_from_env() {
                Ok(secret) => secret,
                Err(e) => {
                    tracing::warn!("Token refresh disabled: {}", e);
                    return Ok(None);
                }
            },
        };
        Ok(Some(Self::new(http, secret, config.token_uri.clone())))
    }

    /// Exchange a refresh token for a fresh credential pair.
    /// Google normally omits the refresh token in the response; the old one is kept.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credentials> {
        tracing::debug!("Refreshing access token at {}", self.token_uri);

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {}", e.error, description),
                    None => e.error,
                })
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));

            // invalid_grant means the refresh token was revoked or expired
            return if status.as_u16() == 400 || status.as_u16() == 401 {
                Err(TriageError::Auth(format!("Token refresh rejected: {}", reason)))
            } else {
                Err(TriageError::Provider(format!("Token refresh failed: {}", reason)))
            };
        }

        let payload: TokenResponse = serde_json::from_str(&body)?;
        let expires_at = payload
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));

        Ok(Credentials {
            access_token: Some(payload.access_token),
            refresh_token: payload
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expires_at,
        })
    }
}

/// Token to present to the provider, plus the refreshed pair when one was issued
#[derive(Debug, Clone)]
pub struct ActiveToken {
    pub access_token: String,
    pub refreshed: Option<Credentials>,
}

/// Resolve the access token to use for a call.
///
/// Fails fast with `Auth` when no access token is stored. Refreshes when the
/// token is expired and both a refresh token and a refresher are available.
pub async fn resolve_access_token(
    credentials: &Credentials,
    refresher: Option<&TokenRefresher>,
) -> Result<ActiveToken> {
    let access_token = credentials
        .access_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| TriageError::Auth("No access token on account".to_string()))?;

    if !credentials.is_expired(Utc::now(), Duration::seconds(EXPIRY_SKEW_SECONDS)) {
        return Ok(ActiveToken {
            access_token: access_token.to_string(),
            refreshed: None,
        });
    }

    match (credentials.refresh_token.as_deref(), refresher) {
        (Some(refresh_token), Some(refresher)) => {
            let refreshed = refresher.refresh(refresh_token).await?;
            let access_token = refreshed.access_token.clone().unwrap_or_default();
            tracing::info!("Access token refreshed");
            Ok(ActiveToken {
                access_token,
                refreshed: Some(refreshed),
            })
        }
        _ => {
            tracing::debug!("Access token expired but no refresh path; using stored token");
            Ok(ActiveToken {
                access_token: access_token.to_string(),
                refreshed: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher_for(server: &MockServer) -> TokenRefresher {
        let secret = ApplicationSecret {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            ..Default::default()
        };
        TokenRefresher::new(reqwest::Client::new(), secret, format!("{}/token", server.uri()))
    }

    fn expired_credentials() -> Credentials {
        Credentials {
            access_token: Some("stale".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
        }
    }

    #[tokio::test]
    async fn test_load_application_secret() {
        let credentials_json = r#"{
            "installed": {
                "client_id": "test-client-id",
                "project_id": "test-project",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "client_secret": "test-secret",
                "redirect_uris": ["http://localhost:8080"]
            }
        }"#;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), credentials_json)
            .await
            .unwrap();

        let secret = load_application_secret(temp_file.path()).await.unwrap();
        assert_eq!(secret.client_id, "test-client-id");
        assert_eq!(secret.client_secret, "test-secret");
    }

    #[tokio::test]
    async fn test_missing_access_token_fails_fast() {
        let credentials = Credentials {
            access_token: None,
            refresh_token: Some("r".to_string()),
            expires_at: None,
        };
        let result = resolve_access_token(&credentials, None).await;
        assert!(matches!(result, Err(TriageError::Auth(_))));
    }

    #[tokio::test]
    async fn test_valid_token_is_used_without_refresh() {
        let credentials = Credentials {
            access_token: Some("live".to_string()),
            refresh_token: Some("r".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        };
        let token = resolve_access_token(&credentials, None).await.unwrap();
        assert_eq!(token.access_token, "live");
        assert!(token.refreshed.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server);
        let token = resolve_access_token(&expired_credentials(), Some(&refresher))
            .await
            .unwrap();

        assert_eq!(token.access_token, "fresh");
        let refreshed = token.refreshed.unwrap();
        assert_eq!(refreshed.access_token.as_deref(), Some("fresh"));
        // Refresh token carried over when the endpoint omits it
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert!(refreshed.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let refresher = refresher_for(&server);
        let result = resolve_access_token(&expired_credentials(), Some(&refresher)).await;

        match result {
            Err(TriageError::Auth(message)) => assert!(message.contains("invalid_grant")),
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_token_endpoint_outage_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let refresher = refresher_for(&server);
        let result = resolve_access_token(&expired_credentials(), Some(&refresher)).await;
        assert!(matches!(result, Err(TriageError::Provider(_))));
    }

    #[tokio::test]
    async fn test_expired_without_refresher_uses_stored_token() {
        let token = resolve_access_token(&expired_credentials(), None)
            .await
            .unwrap();
        assert_eq!(token.access_token, "stale");
        assert!(token.refreshed.is_none());
    }
}
