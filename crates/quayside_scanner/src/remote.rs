//! Remote document store client (Microsoft-Graph-shaped drive API).
//!
//! Used only inside the scanner binary. Listing and metadata requests
//! never download content; `download` is the only byte-moving call.

use crate::protocol::{is_recognised_document, RemoteItem};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote api returned {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("remote transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            RemoteError::Transport(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "lastModifiedDateTime")]
    modified_at: Option<DateTime<Utc>>,
    #[serde(rename = "webUrl")]
    web_url: Option<String>,
    /// Present for files, absent for folders.
    file: Option<FileFacet>,
}

#[derive(Debug, Deserialize)]
struct FileFacet {
    #[serde(default)]
    hashes: Option<FileHashes>,
}

#[derive(Debug, Deserialize)]
struct FileHashes {
    #[serde(rename = "sha256Hash")]
    sha256: Option<String>,
    #[serde(rename = "quickXorHash")]
    quick_xor: Option<String>,
}

/// Thin HTTP client over the drive API.
pub struct RemoteStoreClient {
    http: reqwest::Client,
    base: String,
}

impl RemoteStoreClient {
    pub fn new() -> Self {
        Self::with_base(DEFAULT_GRAPH_BASE)
    }

    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// List folder children, filtered to recognised document extensions.
    /// Follows pagination links until exhausted.
    pub async fn list_children(
        &self,
        token: &str,
        drive_id: &str,
        folder_path: &str,
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        let mut url = format!(
            "{}/drives/{}/root:/{}:/children?$select=id,name,size,lastModifiedDateTime,file,webUrl",
            self.base,
            drive_id,
            folder_path.trim_matches('/')
        );
        let mut items = Vec::new();
        loop {
            let page: DriveChildrenPage = self.get_json(token, &url).await?;
            for item in page.value {
                let Some(file) = &item.file else {
                    continue;
                };
                if !is_recognised_document(&item.name) {
                    continue;
                }
                let hashes = file.hashes.as_ref();
                items.push(RemoteItem {
                    item_id: item.id,
                    drive_id: drive_id.to_string(),
                    name: item.name,
                    size: item.size.unwrap_or(0),
                    modified_at: item.modified_at,
                    sha256: hashes
                        .and_then(|h| h.sha256.as_deref())
                        .map(str::to_ascii_lowercase),
                    quick_xor: hashes.and_then(|h| h.quick_xor.clone()),
                    web_url: item.web_url,
                });
            }
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(items)
    }

    /// Metadata-only hash lookup for one item. `Ok(None)` when the remote
    /// store reports no SHA-256 for the file.
    pub async fn item_sha256(
        &self,
        token: &str,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Option<String>, RemoteError> {
        let url = format!(
            "{}/drives/{}/items/{}?$select=id,name,file",
            self.base, drive_id, item_id
        );
        let item: DriveItem = self.get_json(token, &url).await?;
        Ok(item
            .file
            .and_then(|f| f.hashes)
            .and_then(|h| h.sha256)
            .map(|s| s.to_ascii_lowercase()))
    }

    /// Download the raw bytes of one item.
    pub async fn download(
        &self,
        token: &str,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        let url = format!("{}/drives/{}/items/{}/content", self.base, drive_id, item_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                detail,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
    ) -> Result<T, RemoteError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                detail,
            });
        }
        response
            .json()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }
}

impl Default for RemoteStoreClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_page_parsing() {
        let body = serde_json::json!({
            "value": [
                {
                    "id": "item-1",
                    "name": "Koch_FOB_2026.docx",
                    "size": 145320,
                    "lastModifiedDateTime": "2026-01-15T10:00:00Z",
                    "webUrl": "https://example.sharepoint.com/x",
                    "file": { "hashes": { "sha256Hash": "A1B2", "quickXorHash": "qx" } }
                },
                { "id": "folder-1", "name": "Archive" },
                {
                    "id": "item-2",
                    "name": "book.xlsx",
                    "file": { "hashes": {} }
                }
            ]
        });
        let page: DriveChildrenPage = serde_json::from_value(body).unwrap();
        assert_eq!(page.value.len(), 3);
        assert!(page.value[1].file.is_none(), "folder has no file facet");
        assert_eq!(
            page.value[0]
                .file
                .as_ref()
                .and_then(|f| f.hashes.as_ref())
                .and_then(|h| h.sha256.as_deref()),
            Some("A1B2")
        );
        assert!(page.next_link.is_none());
    }
}
