//! Jupiter price API source, quoted in SOL

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{PriceSource, WSOL_MINT};
use crate::error::{Error, Result};

pub struct JupiterPriceSource {
    http: Client,
    price_url: String,
}

impl JupiterPriceSource {
    pub fn new(price_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            price_url: price_url.into(),
        })
    }
}

#[async_trait]
impl PriceSource for JupiterPriceSource {
    async fn price(&self, asset_id: &str) -> Result<f64> {
        let response = self
            .http
            .get(&self.price_url)
            .query(&[("ids", asset_id), ("vsToken", WSOL_MINT)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), body));
        }

        let body: Value = response.json().await?;
        let price = parse_price(&body, asset_id)?;
        debug!(asset = %asset_id, price, "Price fetched");
        Ok(price)
    }
}

/// Read `data.<mint>.price`, which newer API versions send as a string
fn parse_price(body: &Value, asset_id: &str) -> Result<f64> {
    body.get("data")
        .and_then(|data| data.get(asset_id))
        .and_then(|entry| entry.get("price"))
        .and_then(|price| match price {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        })
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| Error::PriceUnavailable(asset_id.to_string()))
}
