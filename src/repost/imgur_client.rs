//! HTTP client for an Imgur v3 style REST API
//!
//! Reads authenticate with `Client-ID`, actions with the bearer access token.
//! Every request is bounded by the configured timeout.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::repost::config_loader::FeedSettings;
use crate::repost::feed::{
    ActionProvider, FeedItem, FeedProvider, ProviderError, ProviderResult, Quota, VoteDirection,
};

/// Envelope every API response is wrapped in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct GalleryEntry {
    id: String,
    title: Option<String>,
    #[serde(default)]
    link: String,
    account_url: Option<String>,
    #[serde(default)]
    datetime: i64,
    #[serde(default)]
    is_album: bool,
}

impl GalleryEntry {
    fn into_item(self) -> FeedItem {
        FeedItem {
            submitted_at: Utc.timestamp_opt(self.datetime, 0).single().unwrap_or_else(Utc::now),
            id: self.id,
            title: self.title,
            link: self.link,
            author: self.account_url.unwrap_or_default(),
            is_album: self.is_album,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Credits {
    client_remaining: Option<i64>,
    user_reset: Option<i64>,
}

pub struct ImgurClient {
    client: Client,
    settings: FeedSettings,
}

impl ImgurClient {
    pub fn new(settings: FeedSettings) -> ProviderResult<Self> {
        let client = Client::builder()
            .connect_timeout(settings.request_timeout)
            .timeout(settings.request_timeout)
            .tcp_nodelay(true)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .use_rustls_tls()
            .build()?;

        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn client_auth(&self) -> String {
        format!("Client-ID {}", self.settings.client_id)
    }

    fn bearer_auth(&self) -> String {
        format!("Bearer {}", self.settings.access_token)
    }

    async fn check(response: Response) -> ProviderResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.client_auth())
            .send()
            .await?;
        let body: ApiResponse<T> = Self::check(response).await?.json().await?;
        if !body.success {
            warn!("API reported failure for {}", url);
        }
        Ok(body.data)
    }
}

#[async_trait]
impl FeedProvider for ImgurClient {
    async fn list_page(&self, section: &str, sort: &str, page: u32) -> ProviderResult<Vec<FeedItem>> {
        let entries: Vec<GalleryEntry> = self
            .get_data(&format!("gallery/{}/{}/{}?showViral=false", section, sort, page))
            .await?;
        debug!(page, count = entries.len(), "Fetched gallery page");
        Ok(entries.into_iter().map(GalleryEntry::into_item).collect())
    }

    async fn quota(&self) -> ProviderResult<Quota> {
        let credits: Credits = self.get_data("credits").await?;

        let remaining = credits
            .client_remaining
            .ok_or_else(|| ProviderError::Decode("credits missing ClientRemaining".to_string()))?;
        let reset = credits
            .user_reset
            .ok_or_else(|| ProviderError::Decode("credits missing UserReset".to_string()))?;
        let reset_at: DateTime<Utc> = Utc
            .timestamp_opt(reset, 0)
            .single()
            .ok_or_else(|| ProviderError::Decode(format!("invalid reset timestamp {}", reset)))?;

        Ok(Quota {
            remaining: remaining.max(0) as u64,
            reset_at,
        })
    }

    async fn fetch_image(&self, url: &str) -> ProviderResult<Vec<u8>> {
        let response = Self::check(self.client.get(url).send().await?).await?;
        let bytes = response.bytes().await?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ActionProvider for ImgurClient {
    async fn vote(&self, image_id: &str, direction: VoteDirection) -> ProviderResult<()> {
        let url = self.url(&format!("gallery/{}/vote/{}", image_id, direction.as_str()));
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer_auth())
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn post_comment(&self, image_id: &str, text: &str) -> ProviderResult<()> {
        let response = self
            .client
            .post(self.url("comment"))
            .header("Authorization", self.bearer_auth())
            .form(&[("image_id", image_id), ("comment", text)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
