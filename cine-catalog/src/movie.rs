use std::collections::HashMap;

use async_trait::async_trait;
use cine_core::money::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The pricing-relevant slice of a movie record from the content API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieListing {
    #[serde(alias = "id")]
    pub movie_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "paymentType")]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<Currency>,
}

impl MovieListing {
    pub fn new(movie_id: impl Into<String>, payment_type: Option<&str>, price: Option<Decimal>) -> Self {
        Self {
            movie_id: movie_id.into(),
            title: String::new(),
            payment_type: payment_type.map(str::to_string),
            price,
            currency: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Content API unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed movie record: {0}")]
    Decode(String),
}

/// Read-only access to the content catalog.
#[async_trait]
pub trait MovieCatalog: Send + Sync {
    async fn find_listing(&self, movie_id: &str) -> Result<Option<MovieListing>, CatalogError>;
}

/// Catalog held in memory, for fixtures and tests
#[derive(Default)]
pub struct InMemoryCatalog {
    listings: RwLock<HashMap<String, MovieListing>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listings(listings: impl IntoIterator<Item = MovieListing>) -> Self {
        let map = listings
            .into_iter()
            .map(|listing| (listing.movie_id.clone(), listing))
            .collect();
        Self {
            listings: RwLock::new(map),
        }
    }

    pub async fn insert(&self, listing: MovieListing) {
        self.listings
            .write()
            .await
            .insert(listing.movie_id.clone(), listing);
    }
}

#[async_trait]
impl MovieCatalog for InMemoryCatalog {
    async fn find_listing(&self, movie_id: &str) -> Result<Option<MovieListing>, CatalogError> {
        Ok(self.listings.read().await.get(movie_id).cloned())
    }
}
