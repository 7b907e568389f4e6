//! WebhookTransport port - outbound HTTP for webhook delivery
//!
//! - HttpTransport: reqwest ベース（本番用）
//! - テストでは trait を差し替えて失敗応答を再現する

use std::time::Duration;

use async_trait::async_trait;

/// A signed request ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Failed(String),
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `request` and return the response status code.
    async fn post(&self, request: &OutboundRequest) -> Result<u16, TransportError>;
}

/// reqwest client with a per-attempt timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("snapgate-webhook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, request: &OutboundRequest) -> Result<u16, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Failed(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("X-Webhook-Job-ID", "job-1"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"a":1}"#))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let status = transport
            .post(&OutboundRequest {
                url: format!("{}/hook", server.uri()),
                headers: vec![("X-Webhook-Job-ID".into(), "job-1".into())],
                body: br#"{"a":1}"#.to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(status, 204);
    }

    #[tokio::test]
    async fn slow_receivers_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_millis(50)).unwrap();
        let err = transport
            .post(&OutboundRequest {
                url: server.uri(),
                headers: Vec::new(),
                body: b"{}".to_vec(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport
            .post(&OutboundRequest {
                url: "http://127.0.0.1:1/hook".into(),
                headers: Vec::new(),
                body: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Failed(_)));
    }
}
