//! API client module for the Flickr photo catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.flickr.com";
const PHOTO_PAGE_BASE: &str = "https://www.flickr.com/photos";

const METHOD_INTERESTING: &str = "flickr.interestingness.getList";
const METHOD_SEARCH: &str = "flickr.photos.search";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub title: String,
    pub id: String,
    #[serde(rename = "url_s", default)]
    pub url: String,
    pub owner: String,
}

impl GalleryItem {
    /// Link to the photo's page on flickr.com.
    pub fn page_url(&self) -> String {
        format!("{}/{}/{}", PHOTO_PAGE_BASE, self.owner, self.id)
    }
}

#[derive(Debug, Deserialize)]
struct FlickrResponse {
    photos: Option<PhotoResponse>,
    stat: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhotoResponse {
    #[serde(rename = "photo", default)]
    gallery_items: Vec<GalleryItem>,
}

/// Transport and decode failures are deliberately not told apart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiClientError {
    #[error("Network Error: {0}")]
    Network(String),
}

/// Remote catalog operations used by the controller and the poller.
#[async_trait]
pub trait GalleryApi: Send + Sync {
    /// Default page of "interesting" photos.
    async fn fetch_default(&self) -> Result<Vec<GalleryItem>, ApiClientError>;

    /// Search by free text. Callers never pass an empty string.
    async fn search(&self, text: &str) -> Result<Vec<GalleryItem>, ApiClientError>;
}

pub struct ApiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ApiClient {
    pub fn new(api_key: String) -> Self {
        ApiClient {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create a new client with a custom API base URL. Mainly used for testing.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        ApiClient {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn fetch_photos(&self) -> Result<Vec<GalleryItem>, ApiClientError> {
        self.request(METHOD_INTERESTING, None).await
    }

    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn search_photos(&self, text: &str) -> Result<Vec<GalleryItem>, ApiClientError> {
        self.request(METHOD_SEARCH, Some(text)).await
    }

    async fn request(&self, method: &str, text: Option<&str>) -> Result<Vec<GalleryItem>, ApiClientError> {
        let url = format!("{}/services/rest/", self.base_url);
        let mut params: Vec<(&str, &str)> = vec![
            ("method", method),
            ("api_key", self.api_key.as_str()),
            ("format", "json"),
            ("nojsoncallback", "1"),
            ("extras", "url_s"),
        ];
        if let Some(text) = text {
            params.push(("text", text));
        }

        let response = self.client.get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| ApiClientError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiClientError::Network(format!("{}: {}", status, error_text)));
        }

        let body = response.text().await
            .map_err(|e| ApiClientError::Network(e.to_string()))?;
        let items = parse_photos(&body)?;
        tracing::debug!(method, count = items.len(), "Fetched gallery page");
        Ok(items)
    }
}

fn parse_photos(body: &str) -> Result<Vec<GalleryItem>, ApiClientError> {
    let parsed: FlickrResponse = serde_json::from_str(body)
        .map_err(|e| ApiClientError::Network(format!("Failed to decode response: {}", e)))?;

    if parsed.stat.as_deref() == Some("fail") {
        let message = parsed.message.unwrap_or_else(|| "Unknown error".to_string());
        return Err(ApiClientError::Network(format!("Flickr API Error: {}", message)));
    }

    parsed
        .photos
        .map(|p| p.gallery_items)
        .ok_or_else(|| ApiClientError::Network("Response has no photos".to_string()))
}

#[async_trait]
impl GalleryApi for ApiClient {
    async fn fetch_default(&self) -> Result<Vec<GalleryItem>, ApiClientError> {
        self.fetch_photos().await
    }

    async fn search(&self, text: &str) -> Result<Vec<GalleryItem>, ApiClientError> {
        self.search_photos(text).await
    }
}
