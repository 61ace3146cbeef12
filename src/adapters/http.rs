use crate::config::engine_config::{DiscoveryConfig, RankingConfig};
use crate::domain::model::Coordinates;
use crate::domain::ports::{
    DiscoveredPlace, DiscoveryProvider, DiscoveryRequest, TieBreakDelegate, TieBreakRequest,
    TieBreakVerdict,
};
use crate::utils::error::{PostingError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const METERS_PER_MILE: f64 = 1609.344;

fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn provider_failure(provider: &str, message: impl Into<String>) -> PostingError {
    PostingError::ExternalProviderFailure {
        provider: provider.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: PlaceProperties,
}

#[derive(Debug, Deserialize)]
struct PlaceProperties {
    city: Option<String>,
    state_code: Option<String>,
    postcode: Option<String>,
    country_code: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl PlaceProperties {
    /// 缺城市、州或座標的結果無法使用
    fn into_place(self) -> Option<DiscoveredPlace> {
        let name = self.city?.trim().to_string();
        let state = self.state_code?.trim().to_uppercase();
        if name.is_empty() || state.is_empty() {
            return None;
        }
        Some(DiscoveredPlace {
            name,
            state,
            postal_code: self.postcode.filter(|p| !p.trim().is_empty()),
            country_code: self.country_code.unwrap_or_default().to_uppercase(),
            coordinates: Coordinates::new(self.lat?, self.lon?),
        })
    }
}

/// 地點探索 HTTP 客戶端（GeoJSON feature collection）
pub struct HttpDiscoveryProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpDiscoveryProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// 未啟用或沒有 endpoint 時回傳 None
    pub fn from_config(config: &DiscoveryConfig) -> Result<Option<Self>> {
        match (&config.endpoint, config.enabled) {
            (Some(endpoint), true) => Ok(Some(Self::new(
                endpoint.clone(),
                config.api_key.clone(),
                Duration::from_secs(config.timeout_seconds.max(1)),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl DiscoveryProvider for HttpDiscoveryProvider {
    fn name(&self) -> &str {
        "discovery"
    }

    async fn discover(&self, request: &DiscoveryRequest) -> Result<Vec<DiscoveredPlace>> {
        let radius_meters = (request.radius_miles * METERS_PER_MILE).round() as u64;
        let mut query = vec![
            ("lat", request.center.latitude.to_string()),
            ("lon", request.center.longitude.to_string()),
            ("radius_meters", radius_meters.to_string()),
            ("categories", request.category.clone()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apiKey", key.clone()));
        }

        tracing::debug!(
            "Making discovery request to: {} (radius {}m)",
            self.endpoint,
            radius_meters
        );
        let response = self.client.get(&self.endpoint).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(provider_failure(self.name(), format!("HTTP {}", status)));
        }

        let collection: FeatureCollection = response
            .json()
            .await
            .map_err(|e| provider_failure(self.name(), format!("malformed response: {}", e)))?;
        let places: Vec<DiscoveredPlace> = collection
            .features
            .into_iter()
            .filter_map(|f| f.properties.into_place())
            .collect();
        tracing::debug!("Discovery returned {} usable places", places.len());
        Ok(places)
    }
}

/// 外部 tie-break 裁決服務
pub struct HttpTieBreakDelegate {
    client: Client,
    endpoint: String,
}

impl HttpTieBreakDelegate {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &RankingConfig) -> Result<Option<Self>> {
        config
            .delegate_endpoint
            .as_ref()
            .map(|endpoint| {
                Self::new(
                    endpoint.clone(),
                    Duration::from_secs(config.delegate_timeout_seconds.max(1)),
                )
            })
            .transpose()
    }
}

#[async_trait]
impl TieBreakDelegate for HttpTieBreakDelegate {
    async fn judge(&self, request: &TieBreakRequest) -> Result<TieBreakVerdict> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(provider_failure("tie-break", format!("HTTP {}", status)));
        }
        response
            .json::<TieBreakVerdict>()
            .await
            .map_err(|e| provider_failure("tie-break", format!("malformed verdict: {}", e)))
    }
}
