use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use tandem_sync::{ApiError, ChatApi, UploadFile};
use tandem_types::Attachment;
use tandem_types::api::{
    DeleteMessageRequest, EditMessageRequest, MessageResponse, PinResponse, SendMessageRequest,
    ToggleReactionRequest, UploadResponse,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, api_error};

/// REST collaborator backed by reqwest. Every request carries the bearer
/// token and is bounded by the configured timeout.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    config: ClientConfig,
}

impl HttpApi {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.config.endpoint(path).map_err(ApiError::from)
    }

    async fn execute(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = req
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(api_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!("Request failed with {}: {}", status, body);
            return Err(ApiError::Status {
                code: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn execute_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.execute(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl ChatApi for HttpApi {
    async fn send(&self, conversation_id: Uuid, req: SendMessageRequest) -> Result<MessageResponse, ApiError> {
        let url = self.url(&format!("conversations/{}/messages", conversation_id))?;
        self.execute_json(self.client.post(url).json(&req)).await
    }

    async fn edit(&self, message_id: Uuid, content: String) -> Result<(), ApiError> {
        let url = self.url(&format!("messages/{}", message_id))?;
        self.execute(self.client.patch(url).json(&EditMessageRequest { content }))
            .await?;
        Ok(())
    }

    async fn react(&self, message_id: Uuid, emoji: String) -> Result<(), ApiError> {
        let url = self.url(&format!("messages/{}/reactions", message_id))?;
        self.execute(self.client.post(url).json(&ToggleReactionRequest { emoji }))
            .await?;
        Ok(())
    }

    async fn pin(&self, message_id: Uuid) -> Result<PinResponse, ApiError> {
        let url = self.url(&format!("messages/{}/pin", message_id))?;
        self.execute_json(self.client.post(url)).await
    }

    async fn star(&self, message_id: Uuid) -> Result<(), ApiError> {
        let url = self.url(&format!("messages/{}/star", message_id))?;
        self.execute(self.client.post(url)).await?;
        Ok(())
    }

    async fn delete(&self, message_id: Uuid, delete_for_everyone: bool) -> Result<(), ApiError> {
        let url = self.url(&format!("messages/{}", message_id))?;
        let body = DeleteMessageRequest { delete_for_everyone };
        self.execute(self.client.delete(url).json(&body)).await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: Uuid, limit: u32) -> Result<Vec<MessageResponse>, ApiError> {
        let url = self.url(&format!("conversations/{}/messages", conversation_id))?;
        self.execute_json(self.client.get(url).query(&[("limit", limit)]))
            .await
    }

    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<Attachment>, ApiError> {
        let url = self.url("uploads")?;
        let mut form = Form::new();
        for file in files {
            let part = Part::bytes(file.bytes.to_vec())
                .file_name(file.name)
                .mime_str(&file.mime)
                .map_err(api_error)?;
            form = form.part("files", part);
        }
        let resp: UploadResponse = self.execute_json(self.client.post(url).multipart(form)).await?;
        Ok(resp.files)
    }
}
