// # Docker Host Event Source
//
// This crate provides the Docker Engine API implementation of
// `HostEventSource` for the d2n system.
//
// ## Architecture
//
// - Inventory: `GET /containers/json?all=true`, then one inspect per container
// - Hydration: `GET /containers/{id}/json` (404 → absent)
// - Events: one long-lived `GET /events?since=...` response read by a single
//   spawned task, split into lines and forwarded over an mpsc channel
//
// ## Trust Level
//
// **Allowed Capabilities**:
// - ✅ HTTP calls to the configured Docker endpoint only
// - ✅ One reader task per event stream, stopped by `close()`
//
// **Forbidden Capabilities**:
// - ❌ Write to the record store or the mapping cache (owned by Reconciler)
// - ❌ Retry or reconnect the event stream (a lost stream ends the daemon)
//
// ## Transport
//
// `unix://` endpoints talk HTTP/1 over the local socket with hyper; `tcp://`,
// `http://` and `https://` endpoints use reqwest.

mod events;
mod inspect;
mod transport;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use d2n_core::config::DockerConfig;
use d2n_core::traits::{EventAction, HostEvent, HostEventSource};
use d2n_core::{EntitySnapshot, Error, Result};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use events::{LineBuffer, parse_event_line};
use inspect::{ContainerInspect, ContainerSummary};
use transport::{Transport, path_with_query};

/// Docker Engine API host event source
pub struct DockerEventSource {
    /// Engine API endpoint (TCP or Unix socket)
    transport: Arc<Transport>,

    /// Timezone for snapshot timestamps
    timezone: Tz,

    /// Cancels every reader task on close
    shutdown: CancellationToken,

    /// Set once `close()` has run
    closed: AtomicBool,
}

impl std::fmt::Debug for DockerEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerEventSource")
            .field("endpoint", &self.transport.describe())
            .field("timezone", &self.timezone)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl DockerEventSource {
    /// Connect to the Docker daemon and verify it answers `/_ping`
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is invalid or the daemon is unreachable. Both are
    /// fatal at startup.
    pub async fn connect(config: &DockerConfig, timezone: Tz) -> Result<Self> {
        config.validate()?;

        let transport = Transport::new(config.endpoint())?;
        tracing::info!("Connecting to Docker daemon at {}...", transport.describe());

        let source = Self {
            transport: Arc::new(transport),
            timezone,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        };

        source.ping().await?;
        Ok(source)
    }

    async fn ping(&self) -> Result<()> {
        let endpoint = self.transport.describe();
        let reply = self.transport.get("/_ping").await.map_err(|e| {
            tracing::error!("Unable to connect to Docker daemon at {}", endpoint);
            Error::event_source(format!(
                "Unable to connect to Docker daemon at {}: {}",
                endpoint, e
            ))
        })?;

        if !reply.is_success() {
            return Err(Error::event_source(format!(
                "Docker daemon at {} answered ping with status {}",
                endpoint, reply.status
            )));
        }

        Ok(())
    }

    /// Inspect one container
    async fn inspect(&self, id: &str) -> Result<Option<ContainerInspect>> {
        tracing::debug!("Getting info for container: {}", id);

        let reply = self
            .transport
            .get(&format!("/containers/{}/json", id))
            .await?;

        if reply.status == 404 {
            return Ok(None);
        }
        if !reply.is_success() {
            return Err(Error::from_status("docker", reply.status, &reply.text()));
        }

        let inspect = reply.json::<ContainerInspect>().map_err(|e| {
            Error::provider("docker", format!("Failed to parse inspect response: {}", e))
        })?;

        Ok(Some(inspect))
    }

    fn events_filter(actions: &[EventAction]) -> String {
        let actions: Vec<&str> = actions.iter().map(EventAction::as_str).collect();
        serde_json::json!({
            "type": ["container"],
            "event": actions,
        })
        .to_string()
    }

    /// `/events` request starting at `since` (Unix seconds)
    ///
    /// The daemon replays events from `since` onwards, so nothing raised
    /// between subscribing and the request reaching the daemon is lost.
    fn events_path(actions: &[EventAction], since: i64) -> Result<String> {
        let since = since.to_string();
        let filters = Self::events_filter(actions);
        path_with_query(
            "/events",
            &[("since", since.as_str()), ("filters", filters.as_str())],
        )
    }
}

#[async_trait]
impl HostEventSource for DockerEventSource {
    async fn list_all(&self) -> Result<Vec<EntitySnapshot>> {
        tracing::info!("Listing all Docker containers...");

        let reply = self
            .transport
            .get(&path_with_query("/containers/json", &[("all", "true")])?)
            .await?;

        if !reply.is_success() {
            return Err(Error::from_status("docker", reply.status, &reply.text()));
        }

        let summaries = reply.json::<Vec<ContainerSummary>>().map_err(|e| {
            Error::provider("docker", format!("Failed to parse container list: {}", e))
        })?;

        let mut snapshots = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if summary.id.is_empty() {
                continue;
            }
            match self.get(&summary.id).await {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                // Removed between list and inspect
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to get info for container {}: {}", summary.id, e),
            }
        }

        Ok(snapshots)
    }

    async fn get(&self, id: &str) -> Result<Option<EntitySnapshot>> {
        match self.inspect(id).await? {
            Some(inspect) => inspect.into_snapshot(self.timezone).map(Some),
            None => Ok(None),
        }
    }

    fn stream(&self, actions: &[EventAction]) -> Pin<Box<dyn Stream<Item = HostEvent> + Send + 'static>> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Taken now so the subscription covers everything after this call
        let since = Utc::now().timestamp();
        let path = Self::events_path(actions, since);
        let transport = Arc::clone(&self.transport);
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            tracing::info!("Starting to monitor Docker events...");

            let path = match path {
                Ok(path) => path,
                Err(e) => {
                    tracing::error!("Failed to build Docker event request: {}", e);
                    return;
                }
            };

            let body = tokio::select! {
                _ = cancel.cancelled() => return,
                body = transport.open_stream(&path) => body,
            };

            let mut body = match body {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!("Failed to open Docker event stream: {}", e);
                    return;
                }
            };

            let mut buffer = LineBuffer::default();
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    chunk = body.chunk() => chunk,
                };

                match chunk {
                    Ok(Some(bytes)) => {
                        for line in buffer.push(&bytes) {
                            if let Some(event) = parse_event_line(&line) {
                                if tx.send(event).is_err() {
                                    // Consumer dropped the stream
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("Docker event stream closed by the daemon");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("{}", e);
                        break;
                    }
                }
            }

            tracing::debug!("Docker event reader stopped");
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Disconnecting from Docker daemon...");
        self.shutdown.cancel();
    }
}
