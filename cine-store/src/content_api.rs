use std::time::Duration;

use async_trait::async_trait;
use cine_catalog::{CatalogError, MovieCatalog, MovieListing};
use reqwest::Url;
use serde_json::Value;

use crate::app_config::ContentApiConfig;

/// Movie listings from the external content API (`GET {base}/movies/{id}`).
pub struct ContentApiCatalog {
    client: reqwest::Client,
    base_url: Url,
}

impl ContentApiCatalog {
    pub fn new(config: &ContentApiConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            CatalogError::Unavailable(format!("invalid content API url {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CatalogError::Unavailable(format!(
                "content API url {} cannot carry a path",
                config.base_url
            )));
        }

        Ok(Self { client, base_url })
    }

    /// `{base}/movies/{id}` with the id percent-encoded as one path segment,
    /// so `/`, `?` or `#` in an id cannot address another resource.
    fn listing_url(&self, movie_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("movies").push(movie_id);
        }
        url
    }
}

/// The content API returns numeric ids for some titles and may wrap the
/// record in `{"data": ...}`.
fn parse_listing(mut body: Value) -> Result<MovieListing, CatalogError> {
    if let Some(inner) = body.get_mut("data").map(Value::take) {
        body = inner;
    }
    if let Some(Value::Number(n)) = body.get("id") {
        let id = n.to_string();
        body["id"] = Value::String(id);
    }
    serde_json::from_value(body).map_err(|e| CatalogError::Decode(e.to_string()))
}

#[async_trait]
impl MovieCatalog for ContentApiCatalog {
    async fn find_listing(&self, movie_id: &str) -> Result<Option<MovieListing>, CatalogError> {
        let url = self.listing_url(movie_id);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CatalogError::Unavailable(format!(
                "content API answered HTTP {}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        parse_listing(body).map(Some)
    }
}
