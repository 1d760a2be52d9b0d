//! HTTP registration backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, trace};

use super::{BackendError, RegistrationBackend, RegistrationRequest, RegistrationResponse};
use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Posts registrations as JSON to the marketplace backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: Url,
}

impl HttpBackend {
    /// Create a backend for `base_url` + `register_path`.
    ///
    /// `timeout` of `None` waits for the server indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, register_path: &str, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = endpoint_url(base_url, register_path)?;

        let mut builder = Client::builder().user_agent(concat!("croptag/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        debug!(%endpoint, ?timeout, "HTTP registration backend ready");
        Ok(Self { client, endpoint })
    }

    /// Create a backend from the `[backend]` configuration section.
    ///
    /// # Errors
    ///
    /// See [`HttpBackend::new`].
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.register_path, config.timeout())
    }

    /// The full registration URL.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Join a base URL and an absolute path, keeping any path prefix on the base.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the result is not an absolute http(s) URL.
pub fn endpoint_url(base_url: &str, register_path: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        register_path.trim_start_matches('/')
    );
    let url = Url::parse(&joined).map_err(|e| Error::InvalidUrl {
        url: joined.clone(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl {
            url: joined,
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

#[async_trait]
impl RegistrationBackend for HttpBackend {
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> std::result::Result<RegistrationResponse, BackendError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        trace!(status = status.as_u16(), body = %body, "Registration response");

        let parsed = serde_json::from_str::<RegistrationResponse>(&body);

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: parsed.ok().and_then(|r| r.message),
            });
        }

        parsed.map_err(|e| BackendError::InvalidBody(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crate::epc::Epc;
    use crate::registration::{Operator, RegistrationForm, SubmitError, Submitter, GENERIC_FAILURE};
    use crate::session::{ScanSession, ScanSettings};

    /// Serve a single canned HTTP response and hand back the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });

        (format!("http://{addr}"), handle)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn full_session() -> ScanSession {
        let mut session = ScanSession::open(2, ScanSettings::default());
        let now = Instant::now();
        session.admit(Epc::parse(&"A".repeat(24)).unwrap(), now);
        session.admit(Epc::parse(&"B".repeat(24)).unwrap(), now);
        session
    }

    fn form() -> RegistrationForm {
        RegistrationForm {
            crop_id: "CROP-1".to_string(),
            crop_name: String::new(),
            packaging_date: "2026-10-01".to_string(),
            expiry_date: "2026-12-01".to_string(),
            bag_capacity: "25".to_string(),
            total_bags: "2".to_string(),
        }
    }

    fn operator() -> Operator {
        Operator::new(Some("station-9".to_string()), None)
    }

    #[test]
    fn test_endpoint_url_joins_paths() {
        let url = endpoint_url("http://localhost:8080/", "/api/rfid/register").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/rfid/register");

        let url = endpoint_url("https://example.org/market", "api/register").unwrap();
        assert_eq!(url.as_str(), "https://example.org/market/api/register");
    }

    #[test]
    fn test_endpoint_url_rejects_garbage() {
        assert!(matches!(
            endpoint_url("not a url", "/x"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            endpoint_url("ftp://example.org", "/x"),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let config = BackendConfig::default();
        let backend = HttpBackend::from_config(&config).unwrap();
        assert!(backend.endpoint().as_str().ends_with(&config.register_path));
    }

    #[tokio::test]
    async fn test_register_success() {
        let (base, server) = serve_once("200 OK", r#"{"ok":true,"message":"Registered 2 bags"}"#).await;
        let backend = HttpBackend::new(&base, "/api/rfid/register", None).unwrap();
        let submitter = Submitter::new(backend);
        let session = full_session();

        let receipt = submitter.submit(&form(), &operator(), &session).await.unwrap();
        assert_eq!(receipt.message, "Registered 2 bags");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/rfid/register"));
        assert!(raw.contains("\"cropId\":\"CROP-1\""));
        assert!(raw.contains(&"B".repeat(24)));
    }

    #[tokio::test]
    async fn test_register_server_error_with_message() {
        let (base, server) =
            serve_once("500 Internal Server Error", r#"{"ok":false,"message":"Database unavailable"}"#).await;
        let submitter = Submitter::new(HttpBackend::new(&base, "/register", None).unwrap());
        let session = full_session();
        let before = session.epcs().to_vec();

        let err = submitter.submit(&form(), &operator(), &session).await.unwrap_err();
        assert_eq!(
            err,
            SubmitError::Rejected {
                message: "Database unavailable".to_string()
            }
        );
        assert_eq!(session.epcs(), before.as_slice());
        assert!(!submitter.is_busy());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_register_server_error_without_body() {
        let (base, server) = serve_once("500 Internal Server Error", "oops").await;
        let submitter = Submitter::new(HttpBackend::new(&base, "/register", None).unwrap());

        let err = submitter
            .submit(&form(), &operator(), &full_session())
            .await
            .unwrap_err();
        assert_eq!(err.notice().text, GENERIC_FAILURE);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_register_invalid_success_body() {
        let (base, server) = serve_once("200 OK", "<html></html>").await;
        let backend = HttpBackend::new(&base, "/register", None).unwrap();
        let request = form().validate(&operator(), &full_session()).unwrap();

        let result = backend.register(&request).await;
        assert!(matches!(result, Err(BackendError::InvalidBody(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_register_connection_refused() {
        // Bind then drop to get a port nobody is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = HttpBackend::new(&format!("http://{addr}"), "/register", None).unwrap();
        let request = form().validate(&operator(), &full_session()).unwrap();

        let result = backend.register(&request).await;
        assert!(matches!(result, Err(BackendError::Transport(_))));
    }
}
