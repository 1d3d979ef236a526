//! `RestCloudAdapter` - `ICloudAdapter` implementation over the cloud REST API.
//!
//! Wire contract: `GET /resources?path=&limit=1000` (list), `GET
//! /resources/download?path=` (download descriptor), `GET /resources/upload?
//! path=&overwrite=true` (upload descriptor), `PUT /resources?path=` (create
//! folder), `DELETE /resources?path=` (delete), `GET /` (quota). Download and
//! upload are two-step: fetch a JSON descriptor exposing an absolute `href`,
//! then hit that href directly.
//!
//! ## Design notes
//!
//! - Each adapter method performs exactly one HTTP attempt; retry policy
//!   belongs to the reconciler's per-file `retries` bookkeeping, not here.
//! - `reqwest`'s query serializer handles path percent-encoding.

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use dmirror_core::domain::{parse_cloud_modified, CloudPath, Node, Quota};
use dmirror_core::ports::{ApiError, CreateOutcome, ICloudAdapter};

use crate::client::DiskApiClient;

const LIST_LIMIT: u32 = 1000;

/// Raw listing response for `GET /resources`.
#[derive(Debug, Deserialize)]
struct ResourceListing {
    #[serde(rename = "_embedded")]
    embedded: Option<EmbeddedItems>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedItems {
    items: Vec<ResourceItem>,
}

#[derive(Debug, Deserialize)]
struct ResourceItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
    modified: Option<String>,
}

/// Descriptor response for the download/upload two-step protocol.
#[derive(Debug, Deserialize)]
struct HrefDescriptor {
    href: String,
}

/// Quota response for `GET /`.
#[derive(Debug, Deserialize)]
struct QuotaResponse {
    total_space: u64,
    used_space: u64,
}

/// Adapter implementing [`ICloudAdapter`] over the cloud resource REST API.
///
/// The client is behind a `tokio::sync::Mutex` so a token refresh
/// (`set_access_token`, which needs `&mut`) can happen while the adapter is
/// held behind an `&self`-only port trait.
pub struct RestCloudAdapter {
    client: Mutex<DiskApiClient>,
}

impl RestCloudAdapter {
    /// Wraps a [`DiskApiClient`].
    #[must_use]
    pub fn new(client: DiskApiClient) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// Updates the access token held by the underlying client.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        self.client.lock().await.set_access_token(token);
    }

    fn node_from_item(item: ResourceItem) -> Result<Node, ApiError> {
        let path = CloudPath::normalize(&item.path)
            .map_err(|e| ApiError::Protocol { message: e.to_string() })?;
        match item.kind.as_str() {
            "dir" => Ok(Node::Dir {
                path,
                name: item.name,
            }),
            "file" => {
                let modified_raw = item.modified.ok_or_else(|| ApiError::Protocol {
                    message: format!("file '{}' missing modified timestamp", item.name),
                })?;
                let modified = parse_cloud_modified(&modified_raw)
                    .map_err(|e| ApiError::Protocol { message: e })?;
                Ok(Node::File {
                    path,
                    name: item.name,
                    size: item.size.unwrap_or(0),
                    modified,
                })
            }
            other => Err(ApiError::Protocol {
                message: format!("unknown resource type '{other}'"),
            }),
        }
    }

    /// Classifies a non-2xx response into an [`ApiError`]. Call only after
    /// confirming the status is not a success.
    async fn classify_error(response: reqwest::Response, context: &str) -> ApiError {
        let status = response.status();
        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized {
                status: code,
                message: format!("{context}: {body}"),
            },
            StatusCode::NOT_FOUND => ApiError::NotFound {
                status: code,
                message: format!("{context}: {body}"),
            },
            StatusCode::CONFLICT => ApiError::Conflict {
                status: code,
                message: format!("{context}: {body}"),
            },
            s if s.is_server_error() => ApiError::Server {
                status: code,
                message: format!("{context}: {body}"),
            },
            _ => ApiError::Protocol {
                message: format!("{context}: unexpected status {code}: {body}"),
            },
        }
    }

    fn transport_error(context: &str, err: reqwest::Error) -> ApiError {
        ApiError::Transport {
            message: format!("{context}: {err}"),
        }
    }
}

#[async_trait::async_trait]
impl ICloudAdapter for RestCloudAdapter {
    #[instrument(skip(self))]
    async fn list_children(&self, path: &CloudPath) -> Result<Vec<Node>, ApiError> {
        let client = self.client.lock().await;
        let limit = LIST_LIMIT.to_string();
        let response = client
            .request(Method::GET, "/resources")
            .query(&[("path", path.as_str()), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| Self::transport_error("list_children", e))?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response, "list_children").await);
        }

        let listing: ResourceListing = response
            .json()
            .await
            .map_err(|e| ApiError::Protocol {
                message: format!("malformed listing response: {e}"),
            })?;

        let items = listing.embedded.map(|e| e.items).unwrap_or_default();
        debug!(count = items.len(), path = %path.as_str(), "listed children");
        items.into_iter().map(Self::node_from_item).collect()
    }

    #[instrument(skip(self))]
    async fn create_folder(&self, path: &CloudPath) -> Result<CreateOutcome, ApiError> {
        let client = self.client.lock().await;
        let response = client
            .request(Method::PUT, "/resources")
            .query(&[("path", path.as_str())])
            .send()
            .await
            .map_err(|e| Self::transport_error("create_folder", e))?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(CreateOutcome::AlreadyExists);
        }
        if response.status().is_success() {
            return Ok(CreateOutcome::Created);
        }
        Err(Self::classify_error(response, "create_folder").await)
    }

    #[instrument(skip(self))]
    async fn download(&self, path: &CloudPath) -> Result<Vec<u8>, ApiError> {
        let client = self.client.lock().await;
        let step1 = client
            .request(Method::GET, "/resources/download")
            .query(&[("path", path.as_str())])
            .send()
            .await
            .map_err(|e| Self::transport_error("download (step 1)", e))?;

        if !step1.status().is_success() {
            return Err(Self::classify_error(step1, "download (step 1)").await);
        }

        let descriptor: HrefDescriptor = step1.json().await.map_err(|e| ApiError::Protocol {
            message: format!("requested path: {}. invalid download response: {e}", path.as_str()),
        })?;
        if descriptor.href.is_empty() {
            return Err(ApiError::Protocol {
                message: format!("requested path: {}. no href in download response", path.as_str()),
            });
        }

        let step2 = client
            .request_absolute(Method::GET, &descriptor.href)
            .send()
            .await
            .map_err(|e| Self::transport_error("download (step 2)", e))?;

        if !step2.status().is_success() {
            return Err(Self::classify_error(step2, "download (step 2)").await);
        }

        let bytes = step2.bytes().await.map_err(|e| ApiError::Transport {
            message: format!("failed reading download body: {e}"),
        })?;
        debug!(bytes = bytes.len(), path = %path.as_str(), "downloaded file");
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self, bytes))]
    async fn upload(&self, path: &CloudPath, bytes: Vec<u8>) -> Result<(), ApiError> {
        let client = self.client.lock().await;
        let step1 = client
            .request(Method::GET, "/resources/upload")
            .query(&[("path", path.as_str()), ("overwrite", "true")])
            .send()
            .await
            .map_err(|e| Self::transport_error("upload (step 1)", e))?;

        if !step1.status().is_success() {
            return Err(Self::classify_error(step1, "upload (step 1)").await);
        }

        let descriptor: HrefDescriptor = step1.json().await.map_err(|e| ApiError::Protocol {
            message: format!("invalid upload response: {e}"),
        })?;
        if descriptor.href.is_empty() {
            return Err(ApiError::Protocol {
                message: "no href in upload response".to_string(),
            });
        }

        let step2 = client
            .request_absolute(Method::PUT, &descriptor.href)
            .timeout(std::time::Duration::from_secs(15 * 60))
            .body(bytes)
            .send()
            .await
            .map_err(|e| Self::transport_error("upload (step 2)", e))?;

        if !step2.status().is_success() {
            return Err(Self::classify_error(step2, "upload (step 2)").await);
        }
        debug!(path = %path.as_str(), "uploaded file");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &CloudPath) -> Result<(), ApiError> {
        let client = self.client.lock().await;
        let response = client
            .request(Method::DELETE, "/resources")
            .query(&[("path", path.as_str())])
            .send()
            .await
            .map_err(|e| Self::transport_error("delete", e))?;

        if response.status().is_success() {
            return Ok(());
        }
        let err = Self::classify_error(response, "delete").await;
        warn!(path = %path.as_str(), %err, "delete failed");
        Err(err)
    }

    #[instrument(skip(self))]
    async fn quota(&self) -> Result<Quota, ApiError> {
        let client = self.client.lock().await;
        let response = client
            .request(Method::GET, "/")
            .send()
            .await
            .map_err(|e| Self::transport_error("quota", e))?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response, "quota").await);
        }

        let quota: QuotaResponse = response.json().await.map_err(|e| ApiError::Protocol {
            message: format!("malformed quota response: {e}"),
        })?;
        Ok(Quota {
            used: quota.used_space,
            total: quota.total_space,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn adapter_for(server: &MockServer) -> RestCloudAdapter {
        RestCloudAdapter::new(DiskApiClient::new(server.uri(), "test-token"))
    }

    #[tokio::test]
    async fn list_children_parses_dirs_and_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources"))
            .and(query_param("path", "/Photos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_embedded": {
                    "items": [
                        {"name": "sub", "path": "disk:/Photos/sub", "type": "dir"},
                        {"name": "a.jpg", "path": "disk:/Photos/a.jpg", "type": "file", "size": 10, "modified": "2024-01-01T00:00:00+00:00"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let nodes = adapter
            .list_children(&CloudPath::normalize("/Photos").unwrap())
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].is_dir());
        assert!(!nodes[1].is_dir());
    }

    #[tokio::test]
    async fn create_folder_conflict_is_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let outcome = adapter
            .create_folder(&CloudPath::normalize("/Photos").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn create_folder_success_is_created() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let outcome = adapter
            .create_folder(&CloudPath::normalize("/Photos").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
    }

    #[tokio::test]
    async fn download_follows_two_step_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "href": format!("{}/download-blob", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download-blob"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let bytes = adapter
            .download(&CloudPath::normalize("/a.txt").unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn download_missing_href_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"href": ""})))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter
            .download(&CloudPath::normalize("/a.txt").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Protocol { .. }));
    }

    #[tokio::test]
    async fn upload_puts_bytes_to_href() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "href": format!("{}/upload-blob", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload-blob"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        adapter
            .upload(&CloudPath::normalize("/a.txt").unwrap(), b"hello".to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_treats_202_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        adapter
            .delete(&CloudPath::normalize("/a.txt").unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unauthorized_maps_to_unauthorized_variant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let err = adapter
            .list_children(&CloudPath::normalize("/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { status: 401, .. }));
    }

    #[tokio::test]
    async fn quota_reads_used_and_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_space": 1000,
                "used_space": 400
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let quota = adapter.quota().await.unwrap();
        assert_eq!(quota.used, 400);
        assert_eq!(quota.total, 1000);
        assert_eq!(quota.free(), 600);
    }
}
