//! Solar savings estimation
//!
//! Combines a geocoding lookup and the PVGIS yield estimator into a
//! [`SavingsEstimate`]. When either collaborator fails, a deterministic
//! fallback formula (1000 kWh per kWp and year, the German rule of thumb)
//! takes over; the result carries a source tag so the two cases stay
//! distinguishable internally while surfacing the same shape.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{BotError, Result};
use crate::retry::{retry_async, RetryPolicy};

/// German electricity price assumption, €/kWh
pub const ELECTRICITY_PRICE: f64 = 0.32;
/// Feed-in tariff, €/kWh
pub const FEED_IN_TARIFF: f64 = 0.08;
/// CO₂ factor of the German grid mix, kg/kWh
pub const CO2_FACTOR: f64 = 0.420;
/// One tree absorbs roughly this much CO₂ per year, kg
pub const CO2_PER_TREE: f64 = 20.0;
/// Roof area required per kWp of modules, m²
pub const SQM_PER_KWP: f64 = 2.5;
/// Fallback yearly yield per kWp, kWh
pub const FALLBACK_YIELD_PER_KWP: f64 = 1000.0;

/// Roof orientation; maps to the PVGIS azimuth convention (south = 0°)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    North,
    East,
    South,
    West,
    Unknown,
}

impl Orientation {
    pub fn azimuth(self) -> f64 {
        match self {
            Orientation::South | Orientation::Unknown => 0.0,
            Orientation::East => -90.0,
            Orientation::West => 90.0,
            Orientation::North => 180.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::North => "north",
            Orientation::East => "east",
            Orientation::South => "south",
            Orientation::West => "west",
            Orientation::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Where a yield figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YieldSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSavings {
    pub self_consumption_savings: f64,
    pub feed_in_revenue: f64,
    pub total_savings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalImpact {
    /// kg CO₂ per year
    pub co2_savings: f64,
    pub trees_equivalent: f64,
}

/// Complete savings estimate for one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsEstimate {
    /// Recommended system size in kWp
    pub system_size: f64,
    /// Yearly production in kWh
    pub yearly_production: f64,
    /// Share of consumption covered, percent
    pub consumption_coverage: f64,
    pub financial_savings: FinancialSavings,
    pub environmental_impact: EnvironmentalImpact,
    pub source: YieldSource,
}

/// Resolves free-text addresses to coordinates
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Coordinates>;
}

/// Estimates yearly yield for a system at a location
#[async_trait]
pub trait YieldEstimator: Send + Sync {
    async fn yearly_yield(
        &self,
        coordinates: Coordinates,
        peak_kwp: f64,
        tilt: f64,
        azimuth: f64,
    ) -> Result<f64>;
}

/// Google Geocoding API client
pub struct GoogleGeocoder {
    http: reqwest::Client,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, address: &str) -> Result<Coordinates> {
        let response = self
            .http
            .get("https://maps.googleapis.com/maps/api/geocode/json")
            .query(&[("address", address), ("key", &self.api_key)])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let location = body["results"]
            .get(0)
            .map(|r| &r["geometry"]["location"])
            .ok_or_else(|| {
                BotError::GeocodingError(format!("Adresse nicht gefunden: {}", address))
            })?;

        match (location["lat"].as_f64(), location["lng"].as_f64()) {
            (Some(lat), Some(lon)) => Ok(Coordinates { lat, lon }),
            _ => Err(BotError::GeocodingError(
                "Unerwartetes Antwortformat der Geocoding-API".to_string(),
            )),
        }
    }
}

/// PVGIS v5.2 `PVcalc` client
pub struct PvgisClient {
    http: reqwest::Client,
    base_url: String,
}

impl PvgisClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: "https://re.jrc.ec.europa.eu/api/v5_2/PVcalc".to_string(),
        }
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl YieldEstimator for PvgisClient {
    async fn yearly_yield(
        &self,
        coordinates: Coordinates,
        peak_kwp: f64,
        tilt: f64,
        azimuth: f64,
    ) -> Result<f64> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("lat", coordinates.lat.to_string()),
                ("lon", coordinates.lon.to_string()),
                ("peakpower", peak_kwp.to_string()),
                ("loss", "14".to_string()),
                ("outputformat", "json".to_string()),
                ("angle", tilt.to_string()),
                ("aspect", azimuth.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        body["outputs"]["totals"]["fixed"]["E_y"]
            .as_f64()
            .ok_or_else(|| {
                BotError::YieldError("Unerwartetes Antwortformat der PVGIS-API".to_string())
            })
    }
}

/// Savings calculator over the two collaborators
pub struct SolarCalculator {
    geocoder: Arc<dyn Geocoder>,
    estimator: Arc<dyn YieldEstimator>,
    retry: RetryConfig,
}

impl SolarCalculator {
    pub fn new(geocoder: Arc<dyn Geocoder>, estimator: Arc<dyn YieldEstimator>) -> Self {
        Self {
            geocoder,
            estimator,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Recommended system size in kWp: 1 kWp produces ~1000 kWh/year in
    /// Germany.
    pub fn system_size(yearly_consumption: f64) -> f64 {
        round2(yearly_consumption / 1000.0)
    }

    /// Full estimate; collaborator failures degrade to the fallback yield
    /// rather than erroring.
    pub async fn estimate(
        &self,
        yearly_consumption: f64,
        address: &str,
        tilt: f64,
        azimuth: f64,
    ) -> SavingsEstimate {
        let system_size = Self::system_size(yearly_consumption);
        let (yearly_production, source) = match self
            .provider_yield(address, system_size, tilt, azimuth)
            .await
        {
            Ok(yield_kwh) => (yield_kwh, YieldSource::Provider),
            Err(e) => {
                warn!(error = %e, "yield estimation failed, using fallback formula");
                (system_size * FALLBACK_YIELD_PER_KWP, YieldSource::Fallback)
            }
        };
        let yearly_production = round2(yearly_production);

        let coverage = if yearly_consumption > 0.0 {
            (yearly_production / yearly_consumption) * 100.0
        } else {
            0.0
        };

        SavingsEstimate {
            system_size,
            yearly_production,
            consumption_coverage: coverage,
            financial_savings: financial_savings(yearly_production, yearly_consumption),
            environmental_impact: environmental_impact(yearly_production),
            source,
        }
    }

    async fn provider_yield(
        &self,
        address: &str,
        peak_kwp: f64,
        tilt: f64,
        azimuth: f64,
    ) -> Result<f64> {
        let coordinates = retry_async(
            || self.geocoder.geocode(address),
            &mut RetryPolicy::new(self.retry.clone()),
        )
        .await?;
        debug!(lat = coordinates.lat, lon = coordinates.lon, "address resolved");

        retry_async(
            || self.estimator.yearly_yield(coordinates, peak_kwp, tilt, azimuth),
            &mut RetryPolicy::new(self.retry.clone()),
        )
        .await
    }
}

fn financial_savings(yearly_production: f64, consumption: f64) -> FinancialSavings {
    let self_consumption = yearly_production.min(consumption);
    let grid_feed_in = (yearly_production - consumption).max(0.0);

    FinancialSavings {
        self_consumption_savings: round2(self_consumption * ELECTRICITY_PRICE),
        feed_in_revenue: round2(grid_feed_in * FEED_IN_TARIFF),
        total_savings: round2(
            self_consumption * ELECTRICITY_PRICE + grid_feed_in * FEED_IN_TARIFF,
        ),
    }
}

fn environmental_impact(yearly_production: f64) -> EnvironmentalImpact {
    let co2 = yearly_production * CO2_FACTOR;
    EnvironmentalImpact {
        co2_savings: round2(co2),
        trees_equivalent: round1(co2 / CO2_PER_TREE),
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) struct StubGeocoder {
        pub fail: bool,
    }

    #[async_trait]
    impl Geocoder for StubGeocoder {
        async fn geocode(&self, address: &str) -> Result<Coordinates> {
            if self.fail {
                Err(BotError::GeocodingError(format!(
                    "Adresse nicht gefunden: {}",
                    address
                )))
            } else {
                Ok(Coordinates {
                    lat: 52.52,
                    lon: 13.405,
                })
            }
        }
    }

    pub(crate) struct StubEstimator {
        pub yield_per_kwp: Option<f64>,
    }

    #[async_trait]
    impl YieldEstimator for StubEstimator {
        async fn yearly_yield(
            &self,
            _coordinates: Coordinates,
            peak_kwp: f64,
            _tilt: f64,
            _azimuth: f64,
        ) -> Result<f64> {
            match self.yield_per_kwp {
                Some(y) => Ok(peak_kwp * y),
                None => Err(BotError::YieldError("PVGIS nicht erreichbar".to_string())),
            }
        }
    }

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            jitter: false,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_system_size() {
        assert_eq!(SolarCalculator::system_size(4000.0), 4.0);
        assert_eq!(SolarCalculator::system_size(4550.0), 4.55);
        assert_eq!(SolarCalculator::system_size(333.0), 0.33);
    }

    #[test]
    fn test_orientation_azimuth() {
        assert_eq!(Orientation::South.azimuth(), 0.0);
        assert_eq!(Orientation::East.azimuth(), -90.0);
        assert_eq!(Orientation::West.azimuth(), 90.0);
        assert_eq!(Orientation::North.azimuth(), 180.0);
    }

    #[test]
    fn test_financial_savings_with_surplus() {
        // 5000 kWh produced, 4000 consumed: 1000 kWh fed in
        let savings = financial_savings(5000.0, 4000.0);
        assert_eq!(savings.self_consumption_savings, 1280.0);
        assert_eq!(savings.feed_in_revenue, 80.0);
        assert_eq!(savings.total_savings, 1360.0);
    }

    #[test]
    fn test_financial_savings_without_surplus() {
        let savings = financial_savings(3000.0, 4000.0);
        assert_eq!(savings.self_consumption_savings, 960.0);
        assert_eq!(savings.feed_in_revenue, 0.0);
    }

    #[test]
    fn test_environmental_impact() {
        let impact = environmental_impact(4000.0);
        assert_eq!(impact.co2_savings, 1680.0);
        assert_eq!(impact.trees_equivalent, 84.0);
    }

    #[tokio::test]
    async fn test_estimate_uses_provider_yield() {
        let calculator = SolarCalculator::new(
            Arc::new(StubGeocoder { fail: false }),
            Arc::new(StubEstimator {
                yield_per_kwp: Some(950.0),
            }),
        )
        .with_retry(no_jitter());

        let estimate = calculator.estimate(4000.0, "Berlin", 35.0, 0.0).await;
        assert_eq!(estimate.source, YieldSource::Provider);
        assert_eq!(estimate.system_size, 4.0);
        assert_eq!(estimate.yearly_production, 3800.0);
        assert_eq!(estimate.consumption_coverage, 95.0);
    }

    #[tokio::test]
    async fn test_estimate_falls_back_when_estimator_fails() {
        let calculator = SolarCalculator::new(
            Arc::new(StubGeocoder { fail: false }),
            Arc::new(StubEstimator {
                yield_per_kwp: None,
            }),
        )
        .with_retry(no_jitter());

        let estimate = calculator.estimate(4000.0, "Berlin", 35.0, 0.0).await;
        assert_eq!(estimate.source, YieldSource::Fallback);
        assert_eq!(estimate.yearly_production, 4000.0);
    }

    #[tokio::test]
    async fn test_estimate_falls_back_when_geocoding_fails() {
        let calculator = SolarCalculator::new(
            Arc::new(StubGeocoder { fail: true }),
            Arc::new(StubEstimator {
                yield_per_kwp: Some(950.0),
            }),
        )
        .with_retry(no_jitter());

        let estimate = calculator.estimate(4000.0, "Nirgendwo", 35.0, 0.0).await;
        assert_eq!(estimate.source, YieldSource::Fallback);
        assert_eq!(estimate.yearly_production, 4000.0);
    }
}
