use crate::types::{
    AuthResponse, InitiateUploadRequest, LoginRequest, Photo, PhotoPage, PhotoQuery,
    RegisterRequest, TagsUpdate, UploadTicket,
};
use crate::{ApiError, PhotoApi};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Prefix for every backend path, e.g. `http://localhost:8080/api/v1`.
    pub base_url: String,
    pub timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    cfg: Arc<HttpConfig>,
}

impl HttpBackend {
    pub fn new(cfg: HttpConfig) -> Result<Self, ApiError> {
        let mut builder = Client::builder().user_agent(concat!("photoup/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = cfg.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Transport(format!("client build failed: {}", e)))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn tag_path(photo_id: &str, tag: &str) -> String {
        format!(
            "/photos/{}/tags/{}",
            urlencoding::encode(photo_id),
            urlencoding::encode(tag)
        )
    }

    fn authorized(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!("backend responded {} body {:?}", status, body);
            return Err(ApiError::from_status(status.as_u16(), &body));
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        let body = resp
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Protocol(e.to_string()))
    }

    /// Tag endpoints answer with the photo, but an empty 200 is accepted too.
    async fn optional_photo(resp: Response) -> Result<Option<Photo>, ApiError> {
        let body = resp
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(serde_json::from_slice::<Photo>(&body).ok())
    }
}

#[async_trait::async_trait]
impl PhotoApi for HttpBackend {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let resp = Self::send(self.client.post(self.url("/auth/register")).json(request)).await?;
        Self::json(resp).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        let resp = Self::send(self.client.post(self.url("/auth/login")).json(request)).await?;
        Self::json(resp).await
    }

    async fn list_photos(
        &self,
        token: Option<&str>,
        query: &PhotoQuery,
    ) -> Result<PhotoPage, ApiError> {
        let builder = self.client.get(self.url("/photos")).query(&query.params());
        let resp = Self::send(Self::authorized(builder, token)).await?;
        Self::json(resp).await
    }

    async fn get_photo(&self, token: Option<&str>, photo_id: &str) -> Result<Photo, ApiError> {
        let path = format!("/photos/{}", urlencoding::encode(photo_id));
        let resp = Self::send(Self::authorized(self.client.get(self.url(&path)), token)).await?;
        Self::json(resp).await
    }

    async fn initiate_upload(
        &self,
        token: Option<&str>,
        request: &InitiateUploadRequest,
    ) -> Result<UploadTicket, ApiError> {
        let builder = self
            .client
            .post(self.url("/photos/upload/initiate"))
            .json(request);
        let resp = Self::send(Self::authorized(builder, token)).await?;
        Self::json(resp).await
    }

    async fn put_object(
        &self,
        presigned_url: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<(), ApiError> {
        let builder = self
            .client
            .put(presigned_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        let resp = Self::send(builder).await?;
        debug!(
            "storage accepted object (etag {:?})",
            resp.headers().get(reqwest::header::ETAG)
        );
        Ok(())
    }

    async fn complete_upload(
        &self,
        token: Option<&str>,
        upload_job_id: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/uploads/{}/complete", urlencoding::encode(upload_job_id));
        Self::send(Self::authorized(self.client.post(self.url(&path)), token)).await?;
        Ok(())
    }

    async fn add_tag(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tag: &str,
    ) -> Result<Option<Photo>, ApiError> {
        let url = self.url(&Self::tag_path(photo_id, tag));
        let resp = Self::send(Self::authorized(self.client.post(url), token)).await?;
        Self::optional_photo(resp).await
    }

    async fn remove_tag(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tag: &str,
    ) -> Result<Option<Photo>, ApiError> {
        let url = self.url(&Self::tag_path(photo_id, tag));
        let resp = Self::send(Self::authorized(self.client.delete(url), token)).await?;
        Self::optional_photo(resp).await
    }

    async fn update_tags(
        &self,
        token: Option<&str>,
        photo_id: &str,
        tags: &[String],
    ) -> Result<Option<Photo>, ApiError> {
        let path = format!("/photos/{}/tags", urlencoding::encode(photo_id));
        let body = TagsUpdate {
            tags: tags.to_vec(),
        };
        let builder = self.client.patch(self.url(&path)).json(&body);
        let resp = Self::send(Self::authorized(builder, token)).await?;
        Self::optional_photo(resp).await
    }
}
