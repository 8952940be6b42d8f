// src/core/probes/geo_ip.rs

use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{fetch_json, to_payload};
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

/// The geolocation service's answer, as it arrives.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeoIpResponse {
    pub status: String,
    pub message: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "as")]
    pub asn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub ip: IpAddr,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub organization: Option<String>,
    pub asn: Option<String>,
}

impl GeoIpResponse {
    /// `None` when the service says it has nothing for this address.
    pub fn into_location(self, ip: IpAddr) -> Option<GeoLocation> {
        if self.status != "success" {
            return None;
        }
        Some(GeoLocation {
            ip,
            country: self.country,
            country_code: self.country_code,
            region: self.region_name,
            city: self.city,
            zip: self.zip,
            lat: self.lat,
            lon: self.lon,
            timezone: self.timezone,
            isp: self.isp,
            organization: self.org,
            asn: self.asn,
        })
    }
}

pub struct GeoIpProbe {
    client: reqwest::Client,
    base_url: String,
}

impl GeoIpProbe {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl ProbeAdapter for GeoIpProbe {
    fn name(&self) -> ProbeName {
        ProbeName::GeoIp
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let ip = ctx
            .first_ipv4()
            .ok_or_else(|| ProbeError::terminal(ErrorKind::Internal, "no resolved address"))?;
        let url = format!("{}/{}", self.base_url, ip);
        let response: GeoIpResponse = fetch_json(&self.client, &url).await?;
        let message = response.message.clone().unwrap_or_else(|| response.status.clone());

        match response.into_location(ip) {
            Some(location) => {
                info!(%ip, country = location.country.as_deref().unwrap_or("-"), "Geolocation found.");
                to_payload(&location)
            }
            None => {
                debug!(%ip, message = %message, "No geolocation for address.");
                Err(ProbeError::not_found(format!("no geolocation for {ip}: {message}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn successful_answers_become_locations() {
        let raw = json!({
            "status": "success", "country": "Netherlands", "countryCode": "NL",
            "regionName": "North Holland", "city": "Amsterdam", "lat": 52.37, "lon": 4.89,
            "timezone": "Europe/Amsterdam", "isp": "Example ISP", "org": "Example", "as": "AS64500 Example"
        });
        let response: GeoIpResponse = serde_json::from_value(raw).unwrap();
        let location = response.into_location("192.0.2.1".parse().unwrap()).unwrap();
        assert_eq!(location.region.as_deref(), Some("North Holland"));
        assert_eq!(location.asn.as_deref(), Some("AS64500 Example"));
        assert_eq!(serde_json::to_value(&location).unwrap()["countryCode"], "NL");
    }

    #[test]
    fn failed_status_is_nothing_found() {
        let response: GeoIpResponse =
            serde_json::from_value(json!({"status": "fail", "message": "reserved range"})).unwrap();
        assert!(response.into_location("10.0.0.1".parse().unwrap()).is_none());
    }
}
