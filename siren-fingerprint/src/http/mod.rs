//! Outbound HTTP collaborator
//!
//! Blocking interface used from RPC servicer threads and pool workers.
//! A `status_code` of 0 means the request never produced an HTTP response.

pub mod request_manager;

pub use request_manager::RequestManager;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// HTTP client construction errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Unsupported request type: {0}")]
    UnsupportedMethod(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl FromStr for Method {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(HttpError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Basic-auth credentials
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    pub user: String,
    pub password: String,
}

impl Auth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.password.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub text: String,
    pub error: Option<String>,
}

impl HttpResponse {
    pub fn new(status_code: u16, text: impl Into<String>) -> Self {
        Self {
            status_code,
            text: text.into(),
            error: None,
        }
    }

    /// Response for a request that failed below HTTP (DNS, connect, TLS, timeout, I/O).
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            text: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status_code == 0
    }

    pub fn is_success(&self) -> bool {
        self.status_code != 0 && self.status_code < 400
    }

    /// Human-readable failure description for logs
    pub fn describe_failure(&self) -> String {
        if self.is_transport_failure() {
            self.error
                .clone()
                .unwrap_or_else(|| "transport failure".to_string())
        } else {
            format!("Error [{}] making request: {}", self.status_code, self.text)
        }
    }
}

/// Blocking HTTP client
pub trait HttpClient: Send + Sync {
    fn send(
        &self,
        method: Method,
        url: &str,
        body: &str,
        content_type: &str,
        auth: Option<&Auth>,
        verify_tls: bool,
    ) -> HttpResponse;

    /// Stream the body of `url` into `destination`.
    fn download_file(
        &self,
        url: &str,
        destination: &Path,
        timeout_ms: u64,
        verify_tls: bool,
    ) -> HttpResponse;

    fn get(&self, url: &str, body: &str, content_type: &str, auth: Option<&Auth>, verify_tls: bool) -> HttpResponse {
        self.send(Method::Get, url, body, content_type, auth, verify_tls)
    }

    fn post(&self, url: &str, body: &str, content_type: &str, auth: Option<&Auth>, verify_tls: bool) -> HttpResponse {
        self.send(Method::Post, url, body, content_type, auth, verify_tls)
    }

    fn put(&self, url: &str, body: &str, content_type: &str, auth: Option<&Auth>, verify_tls: bool) -> HttpResponse {
        self.send(Method::Put, url, body, content_type, auth, verify_tls)
    }

    fn delete(&self, url: &str, body: &str, content_type: &str, auth: Option<&Auth>, verify_tls: bool) -> HttpResponse {
        self.send(Method::Delete, url, body, content_type, auth, verify_tls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!(" POST ".parse::<Method>().unwrap(), Method::Post);
        assert!("PATCH".parse::<Method>().is_err());
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_response_classification() {
        let failed = HttpResponse::transport_error("connection refused");
        assert!(failed.is_transport_failure());
        assert!(!failed.is_success());
        assert_eq!(failed.describe_failure(), "connection refused");

        let not_found = HttpResponse::new(404, "missing");
        assert!(!not_found.is_success());
        assert_eq!(not_found.describe_failure(), "Error [404] making request: missing");

        assert!(HttpResponse::new(201, "").is_success());
    }
}
