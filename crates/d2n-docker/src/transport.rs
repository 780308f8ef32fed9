//! Engine API transport
//!
//! TCP endpoints go through reqwest. The local Unix socket gets one hyper
//! HTTP/1 connection per request, so the event stream holds its own socket.

use d2n_core::{DockerEndpoint, Error, Result};
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Timeout for inventory and inspect requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for the long-lived event stream (the body itself has none)
const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully read response
pub(crate) struct Reply {
    pub status: u16,
    pub body: Bytes,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

pub(crate) enum Transport {
    Http {
        base_url: String,
        /// Client for short request/response calls
        client: reqwest::Client,
        /// Client for the event stream (no overall timeout)
        stream_client: reqwest::Client,
    },
    #[cfg(unix)]
    Unix { socket_path: std::path::PathBuf },
}

impl Transport {
    pub fn new(endpoint: DockerEndpoint) -> Result<Self> {
        match endpoint {
            DockerEndpoint::Http(base_url) => {
                let client = reqwest::Client::builder()
                    .timeout(DEFAULT_HTTP_TIMEOUT)
                    .build()
                    .map_err(|e| Error::transport(format!("Failed to build HTTP client: {}", e)))?;

                let stream_client = reqwest::Client::builder()
                    .connect_timeout(STREAM_CONNECT_TIMEOUT)
                    .build()
                    .map_err(|e| Error::transport(format!("Failed to build HTTP client: {}", e)))?;

                Ok(Self::Http {
                    base_url,
                    client,
                    stream_client,
                })
            }
            #[cfg(unix)]
            DockerEndpoint::Unix(socket_path) => Ok(Self::Unix { socket_path }),
            #[cfg(not(unix))]
            DockerEndpoint::Unix(socket_path) => Err(Error::config(format!(
                "Unix socket {} is not supported on this platform",
                socket_path.display()
            ))),
        }
    }

    /// Endpoint as shown in logs
    pub fn describe(&self) -> String {
        match self {
            Self::Http { base_url, .. } => base_url.clone(),
            #[cfg(unix)]
            Self::Unix { socket_path } => format!("unix://{}", socket_path.display()),
        }
    }

    /// GET `path` (with query) and read the whole body
    pub async fn get(&self, path: &str) -> Result<Reply> {
        match self {
            Self::Http {
                base_url, client, ..
            } => {
                let response = client
                    .get(format!("{base_url}{path}"))
                    .send()
                    .await
                    .map_err(|e| Error::transport(format!("Docker request failed: {}", e)))?;

                let status = response.status().as_u16();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::transport(format!("Failed to read Docker response: {}", e)))?;
                Ok(Reply { status, body })
            }
            #[cfg(unix)]
            Self::Unix { socket_path } => {
                tokio::time::timeout(DEFAULT_HTTP_TIMEOUT, unix::get(socket_path, path))
                    .await
                    .map_err(|_| Error::transport(format!("Docker request {} timed out", path)))?
            }
        }
    }

    /// GET `path` and hand back the body unread
    ///
    /// A non-success status is an error.
    pub async fn open_stream(&self, path: &str) -> Result<EventBody> {
        match self {
            Self::Http {
                base_url,
                stream_client,
                ..
            } => {
                let response = stream_client
                    .get(format!("{base_url}{path}"))
                    .send()
                    .await
                    .map_err(|e| Error::transport(format!("Docker request failed: {}", e)))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::from_status("docker", status.as_u16(), &body));
                }
                Ok(EventBody::Http(response))
            }
            #[cfg(unix)]
            Self::Unix { socket_path } => {
                let response =
                    tokio::time::timeout(STREAM_CONNECT_TIMEOUT, unix::send(socket_path, path))
                        .await
                        .map_err(|_| {
                            Error::transport(format!("Docker request {} timed out", path))
                        })??;

                let status = response.status();
                if !status.is_success() {
                    return Err(Error::from_status("docker", status.as_u16(), ""));
                }
                Ok(EventBody::Unix(response.into_body()))
            }
        }
    }
}

/// Body of a streaming response, read chunk by chunk
pub(crate) enum EventBody {
    Http(reqwest::Response),
    #[cfg(unix)]
    Unix(hyper::body::Incoming),
}

impl EventBody {
    /// Next chunk, or `None` once the daemon closes the response
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match self {
            Self::Http(response) => response
                .chunk()
                .await
                .map_err(|e| Error::transport(format!("Docker event stream failed: {}", e))),
            #[cfg(unix)]
            Self::Unix(body) => {
                use http_body_util::BodyExt;

                loop {
                    match body.frame().await {
                        None => return Ok(None),
                        Some(Err(e)) => {
                            return Err(Error::transport(format!(
                                "Docker event stream failed: {}",
                                e
                            )));
                        }
                        Some(Ok(frame)) => {
                            // Trailers carry no data
                            if let Ok(data) = frame.into_data() {
                                return Ok(Some(data));
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Build `path?query` with form-encoded parameters
pub(crate) fn path_with_query(path: &str, params: &[(&str, &str)]) -> Result<String> {
    let mut url = reqwest::Url::parse(&format!("http://localhost{path}"))
        .map_err(|e| Error::invalid_input(format!("Invalid Docker API path {}: {}", path, e)))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }

    Ok(match url.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", url.path(), query),
        _ => url.path().to_string(),
    })
}

#[cfg(unix)]
mod unix {
    use super::Reply;
    use d2n_core::{Error, Result};
    use http_body_util::{BodyExt, Empty};
    use hyper::body::{Bytes, Incoming};
    use hyper::{Method, Request, Response};
    use hyper_util::rt::TokioIo;
    use std::path::Path;
    use tokio::net::UnixStream;

    pub(super) async fn send(socket_path: &Path, path: &str) -> Result<Response<Incoming>> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            Error::transport(format!(
                "Failed to connect to Docker socket {}: {}",
                socket_path.display(),
                e
            ))
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::transport(format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("Docker socket connection closed: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("http://localhost{}", path))
            .header(hyper::header::HOST, "localhost")
            .body(Empty::<Bytes>::new())
            .map_err(|e| Error::invalid_input(format!("Failed to build request: {}", e)))?;

        sender
            .send_request(request)
            .await
            .map_err(|e| Error::transport(format!("Docker request failed: {}", e)))
    }

    pub(super) async fn get(socket_path: &Path, path: &str) -> Result<Reply> {
        let response = send(socket_path, path).await?;
        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::transport(format!("Failed to read Docker response: {}", e)))?
            .to_bytes();

        Ok(Reply { status, body })
    }
}
