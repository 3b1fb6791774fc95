/// Keystone password authentication
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use super::client::{build_http_client, with_trailing_slash, Session};
use crate::cluster::ClusterError;
use crate::config::HttpConfig;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Management plane login details
#[derive(Debug, Clone)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub password: String,
    pub tenant: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    project: ProjectRef,
}

#[derive(Deserialize)]
struct ProjectRef {
    id: String,
}

/// Obtains a token and project id from keystone
pub struct AuthClient {
    client: Client,
}

impl AuthClient {
    pub fn new(http: &HttpConfig) -> Result<Self, ClusterError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = build_http_client(http, headers)
            .map_err(|e| ClusterError::AuthFailure(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Authenticate once; a URL without a scheme gets exactly one more try over https
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ClusterError> {
        match self.request_token(&credentials.url, credentials).await {
            Ok(session) => Ok(session),
            Err(err) if !credentials.url.contains("://") => {
                let with_scheme = format!("https://{}", credentials.url);
                warn!("{}; retrying as {}", err, with_scheme);
                self.request_token(&with_scheme, credentials).await
            }
            Err(err) => Err(err),
        }
    }

    async fn request_token(
        &self,
        base: &str,
        credentials: &Credentials,
    ) -> Result<Session, ClusterError> {
        let failure = |reason: String| {
            ClusterError::AuthFailure(format!("Failed to authenticate with {}: {}", base, reason))
        };

        let base_url =
            with_trailing_slash(Url::parse(base).map_err(|e| failure(e.to_string()))?);
        let mut endpoint = base_url
            .join("keystone/v3/auth/tokens")
            .map_err(|e| failure(e.to_string()))?;
        endpoint.set_query(Some("nocatalog"));

        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": credentials.username,
                            "domain": {"id": "default"},
                            "password": credentials.password
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": credentials.tenant,
                        "domain": {"id": "default"}
                    }
                }
            }
        });

        debug!("POST {}", endpoint);
        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 && status.as_u16() != 201 {
            let text = response.text().await.unwrap_or_default();
            return Err(failure(format!("{} {}", status, text)));
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| failure(format!("response has no {} header", SUBJECT_TOKEN_HEADER)))?;

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| failure(format!("malformed token body: {}", e)))?;

        info!(
            "Authenticated as {} (project {})",
            credentials.username, parsed.token.project.id
        );

        Ok(Session::new(base_url, token, parsed.token.project.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(url: String) -> Credentials {
        Credentials {
            url,
            username: "admin@example.com".to_string(),
            password: "secret".to_string(),
            tenant: "service".to_string(),
        }
    }

    #[tokio::test]
    async fn test_authenticate_extracts_token_and_project() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keystone/v3/auth/tokens"))
            .and(query_param("nocatalog", ""))
            .and(body_partial_json(json!({
                "auth": {"scope": {"project": {"name": "service"}}}
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok-abc")
                    .set_body_json(json!({"token": {"project": {"id": "proj-42"}}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(&HttpConfig::default()).unwrap();
        let session = client
            .authenticate(&credentials(server.uri()))
            .await
            .unwrap();

        assert_eq!(session.token, "tok-abc");
        assert_eq!(session.project_id, "proj-42");
        assert_eq!(session.base_url.as_str(), format!("{}/", server.uri()));
    }

    #[tokio::test]
    async fn test_rejected_credentials_fail_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keystone/v3/auth/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad password"))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthClient::new(&HttpConfig::default()).unwrap();
        let err = client
            .authenticate(&credentials(server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::AuthFailure(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_missing_subject_token_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keystone/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"token": {"project": {"id": "proj-42"}}})),
            )
            .mount(&server)
            .await;

        let client = AuthClient::new(&HttpConfig::default()).unwrap();
        let err = client
            .authenticate(&credentials(server.uri()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("X-Subject-Token"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/keystone/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Subject-Token", "tok-abc")
                    .set_body_json(json!({"token": {}})),
            )
            .mount(&server)
            .await;

        let client = AuthClient::new(&HttpConfig::default()).unwrap();
        let err = client
            .authenticate(&credentials(server.uri()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn test_schemeless_url_is_retried_once_over_https() {
        // Nothing listens here, so both attempts fail; the error names the https form
        let client = AuthClient::new(&HttpConfig {
            timeout_secs: 2,
            insecure: false,
        })
        .unwrap();
        let err = client
            .authenticate(&credentials("127.0.0.1:9".to_string()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("https://127.0.0.1:9"));
    }
}
