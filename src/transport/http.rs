//! Blocking HTTP client for the block-storage REST API.

use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::TransportError;
use super::api::{BlockStorageApi, HttpMethod};
use crate::auth::{AuthMethod, Session};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const MICROVERSION_HEADER: &str = "OpenStack-API-Version";

/// Authenticated client bound to the block-storage endpoint.
#[derive(Clone, Debug)]
pub struct HttpBlockStorage {
    http: Client,
    session: Session,
    api_version: String,
}

impl HttpBlockStorage {
    /// Authenticates and builds a client for the resolved endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Auth`] when authentication fails and
    /// [`TransportError::Http`] when the HTTP client cannot be built.
    pub fn connect(method: &AuthMethod, api_version: &str) -> Result<Self, TransportError> {
        let http = Client::builder()
            .build()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        let session = method.authenticate(&http)?;
        debug!(endpoint = %session.endpoint(), "connected to block-storage API");
        Ok(Self::with_session(http, session, api_version))
    }

    /// Builds a client around an existing session.
    #[must_use]
    pub fn with_session(http: Client, session: Session, api_version: &str) -> Self {
        Self {
            http,
            session,
            api_version: api_version.to_owned(),
        }
    }

    /// Session used for every request.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.session.endpoint(), path.trim_start_matches('/'))
    }
}

const fn method_of(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Value of the microversion header for `api_version`, or `None` below v3.
///
/// The service only accepts `<major>.<minor>`, so a bare `3` is sent as
/// `3.0`.
fn microversion(api_version: &str) -> Option<String> {
    let trimmed = api_version.trim();
    let (major, minor) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if major != "3" {
        return None;
    }
    let minor_or_zero = if minor.is_empty() { "0" } else { minor };
    Some(format!("volume {major}.{minor_or_zero}"))
}

/// Pulls the human message out of an error body such as
/// `{"itemNotFound": {"code": 404, "message": "..."}}`.
#[must_use]
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value.as_object().and_then(|object| {
                object.values().find_map(|inner| {
                    inner
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
            })
        })
        .unwrap_or_else(|| body.trim().to_owned())
}

impl BlockStorageApi for HttpBlockStorage {
    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError> {
        let url = self.url(path);
        debug!(method = method.as_str(), %url, "block-storage request");

        let mut request = self
            .http
            .request(method_of(method), &url)
            .header(AUTH_TOKEN_HEADER, self.session.token())
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in self.session.headers() {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(version_header) = microversion(&self.api_version) {
            request = request.header(MICROVERSION_HEADER, version_header);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| TransportError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| TransportError::Parse {
                context: format!("{} {path} response", method.as_str()),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("3", Some("volume 3.0"))]
    #[case(" 3 ", Some("volume 3.0"))]
    #[case("3.0", Some("volume 3.0"))]
    #[case("3.59", Some("volume 3.59"))]
    #[case("3.", Some("volume 3.0"))]
    #[case("2", None)]
    #[case("2.0", None)]
    fn microversion_is_major_dot_minor(#[case] api_version: &str, #[case] expected: Option<&str>) {
        assert_eq!(microversion(api_version).as_deref(), expected);
    }

    #[test]
    fn default_version_sends_normalised_header() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("local address");
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut head = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read request line");
                if line.trim_end().is_empty() {
                    break;
                }
                head.push(line.trim_end().to_owned());
            }
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .expect("respond");
            head
        });

        let client = HttpBlockStorage::with_session(
            Client::new(),
            Session::new("tok", format!("http://{address}/v3/proj")),
            crate::test_support::fake_credentials().api_version_or_default(),
        );
        let response = client
            .send(HttpMethod::Get, "volumes/abc", None)
            .expect("request succeeds");

        assert_eq!(response, None);
        let head = server.join().expect("server thread");
        assert!(
            head.iter()
                .any(|line| line.eq_ignore_ascii_case("openstack-api-version: volume 3.0")),
            "request head: {head:?}"
        );
    }

    #[test]
    fn error_message_reads_first_envelope() {
        let body = r#"{"badRequest": {"code": 400, "message": "Invalid input received"}}"#;
        assert_eq!(error_message(body), "Invalid input received");
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        assert_eq!(error_message(" gateway timeout \n"), "gateway timeout");
    }

    #[test]
    fn url_joins_endpoint_and_path() {
        let client = HttpBlockStorage::with_session(
            Client::new(),
            Session::new("tok", "http://cinder:8776/v3/proj/"),
            "3",
        );
        assert_eq!(client.url("/volumes/abc"), "http://cinder:8776/v3/proj/volumes/abc");
    }
}
