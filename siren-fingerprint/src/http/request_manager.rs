//! reqwest-backed HTTP client

use super::{Auth, HttpClient, HttpError, HttpResponse, Method};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("siren-fingerprint/", env!("CARGO_PKG_VERSION"));

/// Blocking facade over two async reqwest clients (verifying and non-verifying TLS).
///
/// Calls block on the captured runtime handle, so they must come from plain
/// threads (RPC servicers, pool workers), never from inside an async task.
pub struct RequestManager {
    handle: Handle,
    verifying: reqwest::Client,
    insecure: reqwest::Client,
}

impl RequestManager {
    pub fn new(handle: Handle, timeout: Duration) -> Result<Self, HttpError> {
        let verifying = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;

        let insecure = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;

        Ok(Self {
            handle,
            verifying,
            insecure,
        })
    }

    fn client(&self, verify_tls: bool) -> &reqwest::Client {
        if verify_tls {
            &self.verifying
        } else {
            &self.insecure
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

impl HttpClient for RequestManager {
    fn send(
        &self,
        method: Method,
        url: &str,
        body: &str,
        content_type: &str,
        auth: Option<&Auth>,
        verify_tls: bool,
    ) -> HttpResponse {
        let mut request = self
            .client(verify_tls)
            .request(to_reqwest(method), url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_string());
        if let Some(auth) = auth.filter(|a| !a.is_empty()) {
            request = request.basic_auth(&auth.user, Some(&auth.password));
        }

        debug!(%method, url, "Sending HTTP request");
        self.handle.block_on(async move {
            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match response.text().await {
                        Ok(text) => HttpResponse::new(status, text),
                        Err(e) => HttpResponse {
                            status_code: status,
                            text: String::new(),
                            error: Some(e.to_string()),
                        },
                    }
                }
                Err(e) => HttpResponse::transport_error(e.to_string()),
            }
        })
    }

    fn download_file(
        &self,
        url: &str,
        destination: &Path,
        timeout_ms: u64,
        verify_tls: bool,
    ) -> HttpResponse {
        let request = self
            .client(verify_tls)
            .get(url)
            .timeout(Duration::from_millis(timeout_ms));

        debug!(url, destination = %destination.display(), "Downloading file");
        self.handle.block_on(async move {
            let mut response = match request.send().await {
                Ok(response) => response,
                Err(e) => return HttpResponse::transport_error(e.to_string()),
            };

            let status = response.status().as_u16();
            if status >= 400 {
                let text = response.text().await.unwrap_or_default();
                return HttpResponse::new(status, text);
            }

            let mut file = match tokio::fs::File::create(destination).await {
                Ok(file) => file,
                Err(e) => {
                    return HttpResponse::transport_error(format!(
                        "Failed to create {}: {}",
                        destination.display(),
                        e
                    ))
                }
            };

            let mut written: u64 = 0;
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        if let Err(e) = file.write_all(&chunk).await {
                            return HttpResponse::transport_error(format!("Write failed: {}", e));
                        }
                        written += chunk.len() as u64;
                    }
                    Ok(None) => break,
                    Err(e) => return HttpResponse::transport_error(e.to_string()),
                }
            }

            if let Err(e) = file.flush().await {
                warn!("Failed to flush {}: {}", destination.display(), e);
            }
            debug!(url, bytes = written, "Download complete");
            HttpResponse::new(status, String::new())
        })
    }
}
