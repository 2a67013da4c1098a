//! HTTP backend
//!
//! Implements every remote seam against the threat-designer REST API.
//! Non-success statuses become [`ApiError::Status`]; a 409 on lock, heartbeat
//! and document writes is decoded into the corresponding conflict variant.

use crate::api::{
    AccessLevel, AckSink, Collaborator, CollaboratorService, DocumentRef, DocumentStore,
    ImageSource, InterruptAck, LockGrant, LockHolder, LockResponse, LockService, PutOutcome,
    RenewOutcome, StatusSource, StoredDocument,
};
use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError, SyncResult};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tm_model::{HolderId, ModelId, StatusReport, VersionStamp};

const PREFIX: &str = "threat-designer";

#[derive(Serialize)]
struct HolderBody<'a> {
    holder: &'a HolderId,
}

#[derive(Serialize)]
struct PutBody<'a> {
    base_version: &'a VersionStamp,
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct VersionBody {
    version: VersionStamp,
}

#[derive(Deserialize)]
struct ConflictBody {
    server_version: VersionStamp,
}

#[derive(Serialize)]
struct CopyBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    tree: Option<&'a tm_model::TreeId>,
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct CopyResponse {
    id: ModelId,
}

#[derive(Serialize)]
struct AddCollaborator<'a> {
    user_id: &'a str,
    access_level: AccessLevel,
}

#[derive(Serialize)]
struct UpdateAccess {
    access_level: AccessLevel,
}

#[derive(Deserialize)]
struct UrlBody {
    url: String,
}

/// REST client for the threat-designer backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client from configuration
    ///
    /// # Errors
    /// [`SyncError::Config`] if the configuration is invalid or the client
    /// cannot be constructed.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{PREFIX}/{path}", self.base_url)
    }

    fn document_path(doc: &DocumentRef) -> String {
        match doc {
            DocumentRef::Catalog(model) => model.to_string(),
            DocumentRef::AttackTree { model, tree } => format!("{model}/attack-tree/{tree}"),
        }
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        request.send().await.map_err(ApiError::from)
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::status(status.as_u16(), message))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    check(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

async fn decode_conflict<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl StatusSource for HttpBackend {
    async fn fetch_status(&self, model: &ModelId) -> Result<StatusReport, ApiError> {
        let url = self.url(&format!("status/{model}"));
        decode(Self::send(self.client.get(url)).await?).await
    }
}

#[async_trait::async_trait]
impl LockService for HttpBackend {
    async fn acquire(&self, model: &ModelId, holder: &HolderId) -> Result<LockResponse, ApiError> {
        let url = self.url(&format!("{model}/lock"));
        let response = Self::send(self.client.post(url).json(&HolderBody { holder })).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(LockResponse::Held(decode_conflict::<LockHolder>(response).await?));
        }
        Ok(LockResponse::Granted(decode::<LockGrant>(response).await?))
    }

    async fn renew(&self, model: &ModelId, holder: &HolderId) -> Result<RenewOutcome, ApiError> {
        let url = self.url(&format!("{model}/lock/heartbeat"));
        let response = Self::send(self.client.put(url).json(&HolderBody { holder })).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(RenewOutcome::Stolen(decode_conflict::<LockHolder>(response).await?));
        }
        Ok(RenewOutcome::Renewed(decode::<LockGrant>(response).await?))
    }

    async fn release(&self, model: &ModelId, holder: &HolderId) -> Result<(), ApiError> {
        let url = self.url(&format!("{model}/lock"));
        check(Self::send(self.client.delete(url).json(&HolderBody { holder })).await?).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for HttpBackend {
    async fn current_version(&self, doc: &DocumentRef) -> Result<VersionStamp, ApiError> {
        let url = self.url(&format!("{}/version", Self::document_path(doc)));
        let body: VersionBody = decode(Self::send(self.client.get(url)).await?).await?;
        Ok(body.version)
    }

    async fn fetch(&self, doc: &DocumentRef) -> Result<StoredDocument, ApiError> {
        let url = self.url(&Self::document_path(doc));
        decode(Self::send(self.client.get(url)).await?).await
    }

    async fn put(
        &self,
        doc: &DocumentRef,
        body: serde_json::Value,
        base_version: &VersionStamp,
    ) -> Result<PutOutcome, ApiError> {
        let url = self.url(&Self::document_path(doc));
        let request = self.client.put(url).json(&PutBody { base_version, body });
        let response = Self::send(request).await?;
        if response.status() == StatusCode::CONFLICT {
            let conflict: ConflictBody = decode_conflict(response).await?;
            return Ok(PutOutcome::Conflict {
                server_version: conflict.server_version,
            });
        }
        let saved: VersionBody = decode(response).await?;
        Ok(PutOutcome::Saved(saved.version))
    }

    async fn create_copy(
        &self,
        doc: &DocumentRef,
        body: serde_json::Value,
    ) -> Result<DocumentRef, ApiError> {
        let url = self.url(&format!("{}/copy", doc.model()));
        let tree = match doc {
            DocumentRef::AttackTree { tree, .. } => Some(tree),
            DocumentRef::Catalog(_) => None,
        };
        let response = Self::send(self.client.post(url).json(&CopyBody { tree, body })).await?;
        let copy: CopyResponse = decode(response).await?;
        Ok(doc.with_model(copy.id))
    }
}

#[async_trait::async_trait]
impl AckSink for HttpBackend {
    async fn acknowledge(&self, model: &ModelId, ack: InterruptAck) -> Result<(), ApiError> {
        let url = self.url(&format!("{model}/interrupts/{}/ack", ack.correlation_id));
        check(Self::send(self.client.post(url).json(&ack)).await?).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CollaboratorService for HttpBackend {
    async fn list(&self, model: &ModelId) -> Result<Vec<Collaborator>, ApiError> {
        let url = self.url(&format!("{model}/collaborators"));
        decode(Self::send(self.client.get(url)).await?).await
    }

    async fn add(&self, model: &ModelId, user: &str, level: AccessLevel) -> Result<(), ApiError> {
        let url = self.url(&format!("{model}/collaborators"));
        let body = AddCollaborator {
            user_id: user,
            access_level: level,
        };
        check(Self::send(self.client.post(url).json(&body)).await?).await?;
        Ok(())
    }

    async fn remove(&self, model: &ModelId, user: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("{model}/collaborators/{user}"));
        check(Self::send(self.client.delete(url)).await?).await?;
        Ok(())
    }

    async fn update_access(
        &self,
        model: &ModelId,
        user: &str,
        level: AccessLevel,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("{model}/collaborators/{user}"));
        let body = UpdateAccess {
            access_level: level,
        };
        check(Self::send(self.client.put(url).json(&body)).await?).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImageSource for HttpBackend {
    async fn presigned_url(&self, model: &ModelId) -> Result<String, ApiError> {
        let url = self.url(&format!("{model}/diagram"));
        let body: UrlBody = decode(Self::send(self.client.get(url)).await?).await?;
        Ok(body.url)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = check(Self::send(self.client.get(url)).await?).await?;
        let bytes = response.bytes().await.map_err(ApiError::from)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new(&SyncConfig::default().with_base_url("https://tm.example.com/api/"))
            .unwrap()
    }

    #[test]
    fn routes() {
        let backend = backend();
        assert_eq!(backend.base_url(), "https://tm.example.com/api");
        assert_eq!(
            backend.url("status/tm-1"),
            "https://tm.example.com/api/threat-designer/status/tm-1"
        );
        assert_eq!(
            HttpBackend::document_path(&DocumentRef::attack_tree("tm-1", "t-2")),
            "tm-1/attack-tree/t-2"
        );
        assert_eq!(HttpBackend::document_path(&DocumentRef::catalog("tm-1")), "tm-1");
    }

    #[test]
    fn invalid_config_rejected() {
        let err = HttpBackend::new(&SyncConfig::default().with_base_url("")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
