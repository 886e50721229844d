use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_GEOLOCATION_URL: &str = "https://ipinfo.io/json";

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("geolocation service returned HTTP {0}")]
    Status(u16),
    #[error("geolocation JSON decode failed: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Resolves the caller's city without user input.
pub trait CityLocator: Send + Sync + 'static {
    fn locate_city(&self) -> Result<Option<String>, GeoError>;
}

pub type SharedCityLocator = Arc<dyn CityLocator>;

#[derive(Debug, Clone)]
pub struct IpInfoLocator {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    city: Option<String>,
}

impl IpInfoLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl CityLocator for IpInfoLocator {
    fn locate_city(&self) -> Result<Option<String>, GeoError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(GEOLOCATION_TIMEOUT)
            .build()
            .map_err(GeoError::Transport)?;
        let resp = client
            .get(self.url.as_str())
            .header(reqwest::header::USER_AGENT, "skill-client")
            .send()
            .map_err(GeoError::Transport)?;
        if !resp.status().is_success() {
            return Err(GeoError::Status(resp.status().as_u16()));
        }
        let parsed: IpInfoResponse = resp.json().map_err(GeoError::Decode)?;
        Ok(parsed
            .city
            .map(|city| city.trim().to_string())
            .filter(|city| !city.is_empty()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLocator;

impl CityLocator for DisabledLocator {
    fn locate_city(&self) -> Result<Option<String>, GeoError> {
        Ok(None)
    }
}
