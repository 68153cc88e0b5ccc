//! Wildberries catalog and listing client.

use super::{CatalogSource, ListingSource, ListingSourceError};
use crate::config::Config;
use crate::domain::{CatalogEntry, ProductObservation, ResolvedCriterion};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const LISTING_PARAMS: &str = "appType=1&curr=rub&dest=-1257786";

/// Where a subcategory's listing lives on the catalog hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    shard: String,
    query: String,
}

/// Wildberries data source using the public storefront endpoints.
///
/// Subcategory listings need the shard and query published in the catalog,
/// so `fetch_catalog` must have run before subcategory pages are requested.
#[derive(Debug, Clone)]
pub struct WildberriesSource {
    client: Client,
    catalog_url: String,
    search_url: String,
    listing_url: String,
    routes: Arc<RwLock<HashMap<u64, Route>>>,
}

impl WildberriesSource {
    pub fn new(catalog_url: String, search_url: String, listing_url: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            catalog_url,
            search_url,
            listing_url,
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.wb_catalog_url.clone(),
            config.wb_search_url.clone(),
            config.wb_listing_url.clone(),
        )
    }

    fn page_url(&self, criterion: &ResolvedCriterion, page: u32) -> Result<String, ListingSourceError> {
        match criterion {
            ResolvedCriterion::Article(article) => {
                Ok(format!("{}&query={}&page={}", self.search_url, article, page))
            }
            ResolvedCriterion::Subcategory(id) => {
                let routes = self
                    .routes
                    .read()
                    .map_err(|e| ListingSourceError::Other(e.to_string()))?;
                let route = routes.get(id).ok_or_else(|| {
                    ListingSourceError::Other(format!("no catalog route for subcategory {}", id))
                })?;
                Ok(format!(
                    "{}/{}/catalog?{}&{}&page={}",
                    self.listing_url, route.shard, LISTING_PARAMS, route.query, page
                ))
            }
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, ListingSourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ListingSourceError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == 429 {
            return Err(ListingSourceError::RateLimited);
        }
        if !status.is_success() {
            return Err(ListingSourceError::HttpError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ListingSourceError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl ListingSource for WildberriesSource {
    async fn fetch_page(
        &self,
        criterion: &ResolvedCriterion,
        page: u32,
    ) -> Result<Vec<ProductObservation>, ListingSourceError> {
        let url = self.page_url(criterion, page)?;
        debug!(%criterion, page, %url, "Fetching listing page");
        let json = self.get_json(&url).await?;
        parse_listing(&json, page)
    }
}

#[async_trait]
impl CatalogSource for WildberriesSource {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, ListingSourceError> {
        debug!(url = %self.catalog_url, "Fetching category catalog");
        let json = self.get_json(&self.catalog_url).await?;
        let entries = parse_catalog(&json)?;

        let mut routes = self
            .routes
            .write()
            .map_err(|e| ListingSourceError::Other(e.to_string()))?;
        routes.clear();
        for entry in &entries {
            if let (Some(shard), Some(query)) = (&entry.shard, &entry.query) {
                routes.insert(
                    entry.id,
                    Route {
                        shard: shard.clone(),
                        query: query.clone(),
                    },
                );
            }
        }

        Ok(entries)
    }
}

/// Decode `data.products` of a listing response.
///
/// Rows without an id or prices are skipped; an absent product list is a
/// parse error, an empty one simply means the listing has no such page.
fn parse_listing(json: &Value, page: u32) -> Result<Vec<ProductObservation>, ListingSourceError> {
    let products = json
        .get("data")
        .and_then(|d| d.get("products"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| ListingSourceError::ParseError("Missing data.products array".to_string()))?;

    let mut observations = Vec::with_capacity(products.len());
    for product in products {
        match parse_product(product, page) {
            Ok(observation) => observations.push(observation),
            Err(e) => warn!("Failed to parse product: {}", e),
        }
    }
    Ok(observations)
}

fn parse_product(product: &Value, page: u32) -> Result<ProductObservation, ListingSourceError> {
    let field_u64 = |name: &str| {
        product
            .get(name)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ListingSourceError::ParseError(format!("Missing {} field", name)))
    };
    let extended = product.get("extended");
    let extended_i64 = |name: &str| extended.and_then(|e| e.get(name)).and_then(|v| v.as_i64());

    Ok(ProductObservation {
        product_id: field_u64("id")?,
        page,
        price_u: field_u64("priceU")?,
        sale_price_u: field_u64("salePriceU")?,
        basic_sale: extended_i64("basicSale"),
        basic_price_u: extended
            .and_then(|e| e.get("basicPriceU"))
            .and_then(|v| v.as_u64()),
        client_sale: extended_i64("clientSale"),
    })
}

/// Flatten the catalog menu tree into its leaf subcategories.
fn parse_catalog(json: &Value) -> Result<Vec<CatalogEntry>, ListingSourceError> {
    let roots = json
        .as_array()
        .ok_or_else(|| ListingSourceError::ParseError("Expected array response".to_string()))?;

    let mut entries = Vec::new();
    let mut stack: Vec<&Value> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        match node.get("childs").and_then(|c| c.as_array()) {
            Some(children) if !children.is_empty() => {
                stack.extend(children.iter().rev());
            }
            _ => {
                let id = node.get("id").and_then(|v| v.as_u64());
                let name = node.get("name").and_then(|v| v.as_str());
                let (Some(id), Some(name)) = (id, name) else {
                    warn!("Skipping catalog node without id or name");
                    continue;
                };
                entries.push(CatalogEntry {
                    id,
                    name: name.to_string(),
                    shard: node.get("shard").and_then(|v| v.as_str()).map(String::from),
                    query: node.get("query").and_then(|v| v.as_str()).map(String::from),
                });
            }
        }
    }

    Ok(entries)
}
