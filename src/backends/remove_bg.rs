//! HTTP client for remove.bg compatible removal services
//!
//! One multipart POST per image, credential in the `X-Api-Key` header, binary
//! cutout in the response body. Failures are mapped onto the error taxonomy by
//! status code; nothing is retried.

use super::RemovalBackend;
use crate::{
    config::ServiceConfig,
    error::{Result, StudioError},
};
use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    multipart::{Form, Part},
    Client, StatusCode,
};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

/// Header carrying the service credential
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Response header reporting credits consumed by a call
const CREDITS_HEADER: &str = "X-Credits-Charged";

/// Error payload returned by the service on non-2xx responses
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    errors: Vec<ServiceErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorItem {
    title: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Removal backend calling the remote service over HTTP
#[derive(Debug, Clone)]
pub struct RemoveBgClient {
    client: Client,
    config: ServiceConfig,
}

impl RemoveBgClient {
    /// Create a client for the given service settings
    ///
    /// # Errors
    /// - `InvalidConfig` if the settings are incomplete
    /// - `Network` if the HTTP client cannot be created
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| StudioError::network_error("Failed to create HTTP client", &e))?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Build the multipart request for one image without sending it
    ///
    /// # Errors
    /// - `InvalidConfig` if the request cannot be assembled (bad endpoint)
    pub fn build_request(&self, image: &[u8]) -> Result<reqwest::Request> {
        let (mime, extension) = sniff_image_type(image);
        let part = Part::bytes(image.to_vec())
            .file_name(format!("image.{extension}"))
            .mime_str(mime)
            .map_err(|e| StudioError::invalid_config(format!("Invalid MIME type '{mime}': {e}")))?;

        let mut form = Form::new().part(self.config.form_field.clone(), part);
        if let Some(size) = &self.config.size {
            form = form.text("size", size.clone());
        }

        self.client
            .post(&self.config.endpoint)
            .header(API_KEY_HEADER, self.config.api_key.expose())
            .header(ACCEPT, "image/png")
            .multipart(form)
            .build()
            .map_err(|e| {
                StudioError::invalid_config(format!(
                    "Failed to build request for '{}': {}",
                    self.config.endpoint, e
                ))
            })
    }
}

#[async_trait]
impl RemovalBackend for RemoveBgClient {
    #[instrument(skip(self, image), fields(bytes = image.len(), endpoint = %self.config.endpoint))]
    async fn remove(&self, image: &[u8]) -> Result<Vec<u8>> {
        let request = self.build_request(image)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| StudioError::network_error("Removal request", &e))?;

        let status = response.status();
        if let Some(credits) = response.headers().get(CREDITS_HEADER) {
            debug!(credits = ?credits, "Credits charged");
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            // The status decides the category; the body only adds detail
            let body = match response.bytes().await {
                Ok(body) => body.to_vec(),
                Err(e) => {
                    debug!(error = %e, "Could not read error body");
                    Vec::new()
                },
            };
            let error = classify_failure(status, &body);
            warn!(status = status.as_u16(), error = %error, "Removal service rejected image");
            return Err(error);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StudioError::network_error("Reading removal response", &e))?;

        if body.is_empty() {
            return Err(StudioError::service("Service returned an empty body"));
        }
        if content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/"))
        {
            return Err(StudioError::service(format!(
                "Expected an image but received '{}'",
                content_type.unwrap_or_default()
            )));
        }

        debug!(cutout_bytes = body.len(), "Received cutout");
        Ok(body.to_vec())
    }

    fn name(&self) -> &str {
        "remove.bg"
    }
}

/// Map a non-2xx response onto the error taxonomy
pub(crate) fn classify_failure(status: StatusCode, body: &[u8]) -> StudioError {
    let message = service_message(body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    let message = format!("HTTP {}: {}", status.as_u16(), message);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StudioError::Auth(message),
        StatusCode::PAYMENT_REQUIRED | StatusCode::TOO_MANY_REQUESTS => StudioError::Quota(message),
        _ => StudioError::Service(message),
    }
}

/// Pull a readable message out of the service's JSON error body
fn service_message(body: &[u8]) -> Option<String> {
    let parsed: ServiceErrorBody = serde_json::from_slice(body).ok()?;
    let messages: Vec<String> = parsed
        .errors
        .into_iter()
        .map(|item| {
            let mut text = item.title;
            if let Some(detail) = item.detail.filter(|d| !d.is_empty()) {
                text = format!("{text} ({detail})");
            }
            if let Some(code) = item.code {
                text = format!("{text} [{code}]");
            }
            text
        })
        .collect();

    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

/// MIME type and file extension for the multipart part, sniffed from content
fn sniff_image_type(image: &[u8]) -> (&'static str, &'static str) {
    match image::guess_format(image) {
        Ok(format) => (
            format.to_mime_type(),
            format.extensions_str().first().copied().unwrap_or("img"),
        ),
        Err(_) => ("application/octet-stream", "img"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            api_key: ApiKey::new("test-key"),
            endpoint: "https://removal.example.com/v1.0/removebg".to_string(),
            ..ServiceConfig::default()
        }
    }

    fn png_bytes() -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(2, 2)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, b""),
            StudioError::Auth(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, b""),
            StudioError::Auth(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::PAYMENT_REQUIRED, b""),
            StudioError::Quota(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, b""),
            StudioError::Quota(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, b""),
            StudioError::Service(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>"),
            StudioError::Service(_)
        ));
    }

    #[test]
    fn test_service_error_body_is_surfaced() {
        let body = br#"{"errors":[{"title":"Insufficient credits","code":"insufficient_credits"}]}"#;
        let err = classify_failure(StatusCode::PAYMENT_REQUIRED, body);
        let text = err.to_string();
        assert!(text.contains("HTTP 402"));
        assert!(text.contains("Insufficient credits"));
        assert!(text.contains("insufficient_credits"));

        let err = classify_failure(StatusCode::BAD_GATEWAY, b"not json");
        assert!(err.to_string().contains("Bad Gateway"));
    }

    /// Serve one request: answer with the given status head and a body cut short
    async fn serve_truncated_response(listener: tokio::net::TcpListener, status_line: &'static str) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&request).to_lowercase();
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let body_len = request.len() - (head_end + 4);
            let declared = text
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok());
            match declared {
                Some(length) if body_len >= length => break,
                None if text.ends_with("0\r\n\r\n") => break,
                _ => {},
            }
        }

        let response = format!("{status_line}\r\nContent-Length: 500\r\n\r\n{{\"errors\"");
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_decides_category_when_error_body_is_cut_short() {
        for (status_line, expect_quota) in [
            ("HTTP/1.1 402 Payment Required", true),
            ("HTTP/1.1 401 Unauthorized", false),
        ] {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();
            let server = tokio::spawn(serve_truncated_response(listener, status_line));

            let config = ServiceConfig {
                endpoint: format!("http://{address}/v1.0/removebg"),
                ..test_config()
            };
            let client = RemoveBgClient::new(config).unwrap();
            let err = client.remove(&png_bytes()).await.unwrap_err();

            if expect_quota {
                assert!(matches!(err, StudioError::Quota(_)), "got {err}");
            } else {
                assert!(matches!(err, StudioError::Auth(_)), "got {err}");
            }
            assert!(err.to_string().contains(&status_line[9..12]));
            server.await.unwrap();
        }
    }

    #[test]
    fn test_request_carries_credential_and_multipart_body() {
        let client = RemoveBgClient::new(test_config()).unwrap();
        let request = client.build_request(&png_bytes()).unwrap();

        assert_eq!(*request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://removal.example.com/v1.0/removebg"
        );
        assert_eq!(
            request.headers().get(API_KEY_HEADER).unwrap(),
            "test-key"
        );
        let content_type = request.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = ServiceConfig::default();
        assert!(matches!(
            RemoveBgClient::new(config),
            Err(StudioError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sniff_image_type() {
        assert_eq!(sniff_image_type(&png_bytes()), ("image/png", "png"));
        assert_eq!(
            sniff_image_type(b"definitely not an image"),
            ("application/octet-stream", "img")
        );
    }
}
