//! REST client for the message store.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use huddle_shared::constants::TENANT_HEADER;
use huddle_shared::{ConversationSummary, MessageId, MessagePage, TenantId, UserId};

use crate::error::{Result, StoreError};
use crate::store::{MessageStore, PageRequest, Upload, UploadedFile};

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Message store reached over HTTP. Every request carries the tenant
/// header and, when present, the session bearer token.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    tenant: TenantId,
    auth_token: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, tenant: TenantId, auth_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            tenant,
            auth_token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self
            .client
            .request(method, url)
            .header(TENANT_HEADER, self.tenant.as_str());
        match self.auth_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MessageStore for HttpStore {
    async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response = self
            .send(self.request(Method::GET, "/messages/conversations"))
            .await?;
        let body = response.bytes().await?;
        let envelope: DataEnvelope<Vec<ConversationSummary>> = serde_json::from_slice(&body)?;
        Ok(envelope.data)
    }

    async fn messages(&self, counterpart: UserId, page: PageRequest) -> Result<MessagePage> {
        debug!(counterpart = %counterpart, page = page.page, "Fetching history page");
        let builder = self
            .request(Method::GET, &format!("/messages/{counterpart}"))
            .query(&[("page", page.page), ("limit", page.limit)]);
        let body = self.send(builder).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn upload_file(&self, file: Upload) -> Result<UploadedFile> {
        debug!(name = %file.name, size = file.len(), "Uploading attachment");
        let part = Part::bytes(file.bytes.to_vec())
            .file_name(file.name)
            .mime_str(&file.mime_type)?;
        let builder = self
            .request(Method::POST, "/messages/upload")
            .multipart(Form::new().part("file", part));
        let body = self.send(builder).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn delete_message(&self, id: MessageId) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/messages/{id}")))
            .await?;
        Ok(())
    }

    async fn delete_conversation(&self, counterpart: UserId) -> Result<()> {
        self.send(self.request(
            Method::DELETE,
            &format!("/messages/conversation/{counterpart}"),
        ))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = HttpStore::new("http://localhost:5000/api/", TenantId::new("acme"), None);
        assert_eq!(store.base_url, "http://localhost:5000/api");
    }

    #[test]
    fn test_request_carries_tenant_and_token() {
        let store = HttpStore::new(
            "http://localhost:5000/api",
            TenantId::new("acme"),
            Some("secret".into()),
        );
        let request = store
            .request(Method::GET, "/messages/conversations")
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://localhost:5000/api/messages/conversations"
        );
        assert_eq!(request.headers()[TENANT_HEADER], "acme");
        assert_eq!(request.headers()["authorization"], "Bearer secret");
    }

    #[test]
    fn test_page_envelope_decodes() {
        let body = r#"{
            "data": [{
                "message_id": 1, "sender_id": 2, "receiver_id": 3,
                "message": "hello", "created_at": "2024-05-01T10:00:00Z", "is_read": true
            }],
            "pagination": {"currentPage": 1, "totalPages": 3, "hasNext": true}
        }"#;
        let page: MessagePage = serde_json::from_str(body).unwrap();
        assert_eq!(page.data.len(), 1);
        assert!(page.pagination.has_next);
    }
}
