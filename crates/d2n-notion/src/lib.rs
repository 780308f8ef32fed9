// # Notion Record Store
//
// This crate provides the Notion implementation of `RecordStore` for the d2n
// system: one page per container in a Notion database.
//
// ## Implementation Status
//
// - ✅ One HTTP request per store operation
// - ✅ Full error propagation to the Reconciler (it owns the fallback policy)
// - ✅ HTTP timeout configured (30 seconds by default)
// - ✅ Status codes mapped to error kinds (401/403, 404, 429, 5xx)
// - ✅ Startup credential check (`GET /users/me`)
// - ❌ NO retry logic (owned by Reconciler)
// - ❌ NO caching (owned by MappingCache)
// - ❌ NO background tasks
//
// ## Security Requirements
//
// - API key NEVER appears in logs or `Debug` output
// - API key MUST be provided via environment variables only
//
// ## API Reference
//
// - Query a database: POST `/databases/:id/query`
// - Create a page: POST `/pages`
// - Update page properties: PATCH `/pages/:id`
// - Retrieve the bot user: GET `/users/me`
//
// ## Page Properties
//
// | Property | Notion type | Source |
// |----------|-------------|--------|
// | `Name`   | title       | container name |
// | `Status` | status      | lifecycle status |
// | `Seen`   | date        | last-seen timestamp (RFC 3339) |
// | `IP`     | rich_text   | network address |
// | `Ports`  | rich_text   | newline-joined port mappings |

use async_trait::async_trait;
use d2n_core::config::NotionConfig;
use d2n_core::traits::RecordStore;
use d2n_core::{EntitySnapshot, Error, RecordHandle, Result};
use serde::Deserialize;
use serde_json::{Value, json};

/// Notion API base URL
const NOTION_API_BASE: &str = "https://api.notion.com/v1";

/// API version sent with every request
const NOTION_VERSION: &str = "2022-06-28";

const PROVIDER: &str = "notion";

#[derive(Debug, Deserialize)]
struct PageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<PageRef>,
}

/// Notion record store
///
/// Stateless apart from the HTTP client; every call is a single request.
pub struct NotionRecordStore {
    /// Integration token
    /// ⚠️ NEVER log this value
    api_key: String,

    /// API base URL without trailing slash
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for NotionRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionRecordStore")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl NotionRecordStore {
    /// Create a new Notion record store
    ///
    /// # Errors
    ///
    /// Fails if the API key is empty or the HTTP client cannot be built.
    pub fn new(config: &NotionConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::transport(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(NOTION_API_BASE)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url,
            client,
        })
    }

    /// Check that the API key is accepted
    ///
    /// Called once at startup; any failure is fatal there.
    pub async fn verify(&self) -> Result<()> {
        tracing::info!("Connecting to Notion API...");

        self.send(self.request(reqwest::Method::GET, "users/me"))
            .await
            .map(|_| ())
            .map_err(|e| match e {
                Error::Authentication(msg) => Error::Authentication(format!(
                    "Unable to connect to Notion API with provided key: {}",
                    msg
                )),
                other => other,
            })
    }

    /// Check that a target database is shared with the integration
    pub async fn check_database(&self, database_id: &str) -> Result<()> {
        tracing::debug!("Retrieving database info for ID: {}", database_id);

        self.send(self.request(reqwest::Method::GET, &format!("databases/{}", database_id)))
            .await
            .map(|_| ())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Send a request and decode the JSON body, mapping failures to error kinds
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::from_status(PROVIDER, status.as_u16(), &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to parse response: {}", e)))
    }

    /// Page properties for a snapshot
    pub fn properties(snapshot: &EntitySnapshot) -> Value {
        json!({
            "Name": { "title": [{ "text": { "content": snapshot.name() } }] },
            "Status": { "status": { "name": snapshot.status().as_str() } },
            "Seen": { "date": { "start": snapshot.seen().to_rfc3339() } },
            "IP": { "rich_text": [{ "text": { "content": snapshot.address() } }] },
            "Ports": { "rich_text": [{ "text": { "content": snapshot.ports_text() } }] },
        })
    }
}

#[async_trait]
impl RecordStore for NotionRecordStore {
    async fn find(&self, bucket: &str, name: &str) -> Result<Option<RecordHandle>> {
        tracing::debug!(
            "Finding page ID in database {} for container: {}",
            bucket,
            name
        );

        let body = json!({
            "filter": {
                "property": "Name",
                "title": { "equals": name }
            }
        });

        let value = self
            .send(
                self.request(reqwest::Method::POST, &format!("databases/{}/query", bucket))
                    .json(&body),
            )
            .await
            .inspect_err(|e| {
                tracing::error!(
                    "Error finding page for container {} in database {}: {}",
                    name,
                    bucket,
                    e
                );
            })?;

        let response: QueryResponse = serde_json::from_value(value)?;
        match response.results.into_iter().next() {
            Some(page) => Ok(Some(RecordHandle::new(page.id))),
            None => {
                tracing::debug!("No page in database {} matches {}", bucket, name);
                Ok(None)
            }
        }
    }

    async fn create(&self, bucket: &str, snapshot: &EntitySnapshot) -> Result<RecordHandle> {
        tracing::debug!(
            "Creating new page in database {} for container: {}",
            bucket,
            snapshot.name()
        );

        let body = json!({
            "parent": { "database_id": bucket },
            "properties": Self::properties(snapshot),
        });

        let value = self
            .send(self.request(reqwest::Method::POST, "pages").json(&body))
            .await
            .inspect_err(|e| {
                tracing::error!("Error creating page for {}: {}", snapshot.name(), e);
            })?;

        let page: PageRef = serde_json::from_value(value)?;
        if page.id.is_empty() {
            return Err(Error::provider(PROVIDER, "Created page has no id"));
        }

        Ok(RecordHandle::new(page.id))
    }

    async fn update(&self, handle: &RecordHandle, snapshot: &EntitySnapshot) -> Result<()> {
        tracing::debug!(
            "Updating page with ID: {} for container: {}",
            handle,
            snapshot.name()
        );

        let body = json!({ "properties": Self::properties(snapshot) });

        self.send(
            self.request(reqwest::Method::PATCH, &format!("pages/{}", handle))
                .json(&body),
        )
        .await
        .inspect_err(|e| {
            tracing::error!(
                "Error updating page {} for container {}: {}",
                handle,
                snapshot.name(),
                e
            );
        })?;

        Ok(())
    }

    fn store_name(&self) -> &'static str {
        PROVIDER
    }
}
