//! HTTP client for velocity-service

use serde::de::DeserializeOwned;
use serde::Deserialize;
use velocity_core::{VelocityError, VelocityMetrics, VelocityRecord};

pub struct ServiceClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

/// Body of a GET /metrics reply, success or failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub count: Option<usize>,
    pub cached: Option<bool>,
    pub cache_age: Option<u64>,
    pub stale: Option<bool>,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl ServiceClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn metrics(&self, refresh: bool) -> Result<Envelope<VelocityMetrics>, VelocityError> {
        let mut url = format!("{}/metrics", self.base_url);
        if refresh {
            url.push_str("?refresh=true");
        }
        self.get(&url)
    }

    pub fn raw(&self) -> Result<Envelope<Vec<VelocityRecord>>, VelocityError> {
        self.get(&format!("{}/metrics?raw=true", self.base_url))
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Result<Envelope<T>, VelocityError> {
        let resp = self.client.get(url).send().map_err(|e| {
            VelocityError::DataSource(format!("{} (is velocity-service running?)", e))
        })?;
        let status = resp.status();
        let text = resp.text().map_err(VelocityError::from)?;

        match serde_json::from_str::<Envelope<T>>(&text) {
            Ok(envelope) if envelope.success && status.is_success() => Ok(envelope),
            Ok(envelope) => Err(VelocityError::Service {
                status: status.as_u16(),
                message: failure_message(envelope.error, envelope.details),
            }),
            Err(_) if !status.is_success() => Err(VelocityError::Service {
                status: status.as_u16(),
                message: text,
            }),
            Err(e) => Err(VelocityError::Serialization(e)),
        }
    }
}

// Development-mode services attach diagnostics in `details`
fn failure_message(error: Option<String>, details: Option<String>) -> String {
    let error = error.unwrap_or_else(|| "request failed".to_string());
    match details {
        Some(details) => format!("{} ({})", error, details),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stale_envelope() {
        let body = r#"{
            "success": true,
            "data": {
                "totalCompanies": 4,
                "tierBreakdown": {"high_velocity_gp": 1, "stable_but_leaking": 2, "high_distress": 1},
                "averageCapitalRaised": 10,
                "averageMonthsFundraising": 3,
                "totalCapitalRaised": 40.0,
                "lastSyncedAt": null
            },
            "cached": true,
            "cacheAge": 75,
            "stale": true,
            "error": "Data source error: timeout",
            "timestamp": "2024-06-01T00:00:00Z"
        }"#;
        let envelope: Envelope<VelocityMetrics> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.stale, Some(true));
        assert_eq!(envelope.cache_age, Some(75));
        assert_eq!(envelope.data.unwrap().tier_breakdown.stable_but_leaking, 2);
    }

    #[test]
    fn failure_message_includes_details() {
        let body = r#"{"success": false, "error": "Failed to fetch velocity metrics", "details": "DataSource(\"timeout\")"}"#;
        let envelope: Envelope<VelocityMetrics> = serde_json::from_str(body).unwrap();
        assert_eq!(
            failure_message(envelope.error, envelope.details),
            "Failed to fetch velocity metrics (DataSource(\"timeout\"))"
        );
        assert_eq!(failure_message(None, None), "request failed");
    }

    #[test]
    fn trims_trailing_slash() {
        let client = ServiceClient::new("http://localhost:3000/");
        assert_eq!(client.base_url, "http://localhost:3000");
    }
}
