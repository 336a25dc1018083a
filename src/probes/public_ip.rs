//! Public IP lookup, change tracking, and per-hop geolocation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::probes::{ProbeError, ProbeResult};

const IP_API_URL: &str = "http://ip-api.com/json/";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);
const GEO_TIMEOUT: Duration = Duration::from_secs(5);
/// ip-api free tier allows 45 req/min; cache keeps us far below that.
const GEO_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct PublicIpInfo {
    pub ip: String,
    pub country: String,
    pub country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,
    #[serde(rename = "as", default)]
    asn: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

pub struct PublicIpClient {
    http: reqwest::Client,
}

impl PublicIpClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Query the public-IP provider.
    pub async fn fetch(&self) -> ProbeResult<PublicIpInfo> {
        let response = self
            .http
            .get(IP_API_URL)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|_| ProbeError::Parse)?;

        Ok(PublicIpInfo {
            ip: body.query.unwrap_or_else(|| "N/A".into()),
            country: body.country.unwrap_or_else(|| "N/A".into()),
            country_code: body.country_code,
        })
    }
}

/// Tracks the previously observed public IP and reports changes.
#[derive(Debug, Default)]
pub struct IpChangeTracker {
    previous: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpChange {
    pub old_ip: String,
    pub new_ip: String,
}

impl IpChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest observation; `Some` when the IP really moved.
    ///
    /// The first observation and provider errors never count as changes.
    pub fn check_change(&mut self, new_ip: &str) -> Option<IpChange> {
        let Some(previous) = self.previous.as_deref() else {
            self.previous = Some(new_ip.to_string());
            return None;
        };

        if new_ip == "N/A" || new_ip == previous {
            return None;
        }

        let change = IpChange {
            old_ip: previous.to_string(),
            new_ip: new_ip.to_string(),
        };
        self.previous = Some(new_ip.to_string());
        Some(change)
    }

    pub fn previous_ip(&self) -> Option<&str> {
        self.previous.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct GeoInfo {
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub asn: String,
    pub org: String,
}

/// Geolocation + ASN lookup with a one-hour cache.
pub struct GeoService {
    http: reqwest::Client,
    cache: Mutex<HashMap<String, (GeoInfo, Instant)>>,
}

impl GeoService {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        if let Some((info, at)) = self.cache.lock().get(ip) {
            if at.elapsed() < GEO_CACHE_TTL {
                return Some(info.clone());
            }
        }

        let url = format!("{IP_API_URL}{ip}?fields=status,country,countryCode,city,as,org");
        let response = match self.http.get(&url).timeout(GEO_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(ip, error = %e, "geo lookup network error");
                return None;
            }
        };

        let body: IpApiResponse = response.json().await.ok()?;
        if body.status.as_deref() != Some("success") {
            return None;
        }

        let info = GeoInfo {
            country: body.country.unwrap_or_else(|| "?".into()),
            country_code: body.country_code.unwrap_or_default(),
            city: body.city.unwrap_or_default(),
            asn: body
                .asn
                .unwrap_or_default()
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_start_matches("AS")
                .to_string(),
            org: body.org.unwrap_or_default(),
        };

        self.cache
            .lock()
            .insert(ip.to_string(), (info.clone(), Instant::now()));
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_not_a_change() {
        let mut tracker = IpChangeTracker::new();
        assert!(tracker.check_change("1.2.3.4").is_none());
        assert_eq!(tracker.previous_ip(), Some("1.2.3.4"));
    }

    #[test]
    fn detects_real_change_and_updates_previous() {
        let mut tracker = IpChangeTracker::new();
        tracker.check_change("1.2.3.4");
        let change = tracker.check_change("5.6.7.8").unwrap();
        assert_eq!(change.old_ip, "1.2.3.4");
        assert_eq!(change.new_ip, "5.6.7.8");
        assert!(tracker.check_change("5.6.7.8").is_none());
    }

    #[test]
    fn provider_errors_do_not_count() {
        let mut tracker = IpChangeTracker::new();
        tracker.check_change("1.2.3.4");
        assert!(tracker.check_change("N/A").is_none());
        assert_eq!(tracker.previous_ip(), Some("1.2.3.4"));
    }
}
