//! Contracts for the content feed and the moderation actions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// One published item from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub title: Option<String>,
    pub link: String,
    pub author: String,
    pub submitted_at: DateTime<Utc>,
    pub is_album: bool,
}

/// Request quota as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }
}

#[async_trait]
pub trait FeedProvider: Send + Sync {
    async fn list_page(&self, section: &str, sort: &str, page: u32) -> ProviderResult<Vec<FeedItem>>;

    async fn quota(&self) -> ProviderResult<Quota>;

    async fn fetch_image(&self, url: &str) -> ProviderResult<Vec<u8>>;
}

#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn vote(&self, image_id: &str, direction: VoteDirection) -> ProviderResult<()>;

    async fn post_comment(&self, image_id: &str, text: &str) -> ProviderResult<()>;
}
