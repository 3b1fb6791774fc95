/// Management plane API client
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::error::ApiError;
use super::models::*;
use super::ManagementPlane;
use crate::config::HttpConfig;

const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Authenticated session for one CLI invocation
#[derive(Debug, Clone)]
pub struct Session {
    pub base_url: Url,
    pub token: String,
    pub project_id: String,
}

impl Session {
    pub fn new(base_url: Url, token: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            token: token.into(),
            project_id: project_id.into(),
        }
    }
}

/// Url::join replaces the last path segment unless the base ends in '/'
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Build the shared reqwest client: per-request timeout and opt-in TLS bypass
pub(crate) fn build_http_client(
    http: &HttpConfig,
    default_headers: header::HeaderMap,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .default_headers(default_headers)
        .timeout(std::time::Duration::from_secs(http.timeout_secs))
        .danger_accept_invalid_certs(http.insecure)
        .build()
}

/// qbert/resmgr API client
#[derive(Clone)]
pub struct ManagementPlaneClient {
    client: Client,
    session: Session,
}

impl ManagementPlaneClient {
    /// Create a client carrying the session token on every request
    pub fn new(session: Session, http: &HttpConfig) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::HeaderName::from_static(AUTH_TOKEN_HEADER),
            header::HeaderValue::from_str(&session.token)?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = build_http_client(http, headers)?;

        Ok(Self { client, session })
    }

    fn qbert_path(&self, tail: &str) -> String {
        format!("qbert/v3/{}/{}", self.session.project_id, tail)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.session.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        Self::handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let response = self.send_post(path, body).await?;
        Self::handle_response(response).await
    }

    async fn send_post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(path)?;
        debug!("POST {}", url);

        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Check the status, then decode the body
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            Ok(serde_json::from_str(&body)?)
        } else {
            Err(ApiError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ManagementPlane for ManagementPlaneClient {
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ApiError> {
        self.get(&self.qbert_path("clusters")).await
    }

    async fn get_cluster(&self, cluster_uuid: &str) -> Result<ClusterDetail, ApiError> {
        self.get(&self.qbert_path(&format!("clusters/{}", cluster_uuid)))
            .await
    }

    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<CreateClusterResponse, ApiError> {
        self.post(&self.qbert_path("clusters"), request).await
    }

    async fn attach_nodes(&self, cluster_uuid: &str, nodes: &[AttachNode]) -> Result<(), ApiError> {
        let path = self.qbert_path(&format!("clusters/{}/attach", cluster_uuid));
        self.send_post(&path, nodes).await.map(|_| ())
    }

    async fn list_nodes(&self) -> Result<Vec<QbertNode>, ApiError> {
        self.get(&self.qbert_path("nodes")).await
    }

    async fn list_cloud_providers(&self) -> Result<Vec<CloudProvider>, ApiError> {
        self.get(&self.qbert_path("cloudProviders")).await
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, ApiError> {
        self.get("resmgr/v1/hosts").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ManagementPlaneClient {
        let session = Session::new(Url::parse(&server.uri()).unwrap(), "tok-123", "proj-1");
        ManagementPlaneClient::new(session, &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let session = Session::new(
            Url::parse("https://pf9.example.com").unwrap(),
            "test-token",
            "project",
        );
        assert!(ManagementPlaneClient::new(session, &HttpConfig::default()).is_ok());
    }

    #[test]
    fn test_session_base_keeps_path_prefix() {
        let session = Session::new(
            Url::parse("https://pf9.example.com/region1").unwrap(),
            "t",
            "p",
        );
        assert_eq!(
            session.base_url.join("resmgr/v1/hosts").unwrap().as_str(),
            "https://pf9.example.com/region1/resmgr/v1/hosts"
        );
    }

    #[test]
    fn test_token_with_newline_is_rejected() {
        let session = Session::new(Url::parse("https://pf9.example.com").unwrap(), "bad\ntoken", "p");
        assert!(matches!(
            ManagementPlaneClient::new(session, &HttpConfig::default()),
            Err(ApiError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_list_clusters_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qbert/v3/proj-1/clusters"))
            .and(header("X-Auth-Token", "tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "demo", "uuid": "c-1", "status": "ok"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let clusters = client_for(&server).list_clusters().await.unwrap();

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].uuid, "c-1");
    }

    #[tokio::test]
    async fn test_non_success_status_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qbert/v3/proj-1/nodes"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).list_nodes().await.unwrap_err();

        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resmgr/v1/hosts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).list_hosts().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_attach_posts_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/qbert/v3/proj-1/clusters/c-1/attach"))
            .and(body_json(json!([
                {"uuid": "h-1", "isMaster": true},
                {"uuid": "h-2", "isMaster": true}
            ])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let nodes = vec![
            AttachNode {
                uuid: "h-1".to_string(),
                is_master: true,
            },
            AttachNode {
                uuid: "h-2".to_string(),
                is_master: true,
            },
        ];

        client_for(&server)
            .attach_nodes("c-1", &nodes)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_attach_failure_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/qbert/v3/proj-1/clusters/c-1/attach"))
            .respond_with(ResponseTemplate::new(500).set_body_string("node busy"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .attach_nodes("c-1", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("node busy"));
    }

    #[tokio::test]
    async fn test_create_cluster_returns_uuid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/qbert/v3/proj-1/clusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "c-9"})))
            .mount(&server)
            .await;

        let request = CreateClusterRequest::new(&ClusterSpec::new("demo"), "pool");
        let response = client_for(&server).create_cluster(&request).await.unwrap();
        assert_eq!(response.uuid.as_deref(), Some("c-9"));
    }
}
