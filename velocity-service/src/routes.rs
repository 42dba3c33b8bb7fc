use crate::error::AppError;
use crate::state::{Freshness, SharedState};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info};

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Whole seconds, rounded to nearest.
fn rounded_secs(age: Duration) -> u64 {
    (age.as_millis() as u64 + 500) / 1000
}

// GET /metrics
#[derive(Debug, Default)]
pub struct MetricsQuery {
    pub refresh: Option<String>,
    pub raw: Option<String>,
}

impl MetricsQuery {
    /// Repeated parameters keep their first value.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "refresh" => &mut query.refresh,
                "raw" => &mut query.raw,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }

    pub fn force_refresh(&self) -> bool {
        self.refresh.as_deref() == Some("true")
    }

    pub fn raw(&self) -> bool {
        self.raw.as_deref() == Some("true")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEnvelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl<T> MetricsEnvelope<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            count: None,
            cached: None,
            cache_age: None,
            stale: None,
            error: None,
            timestamp: timestamp(),
        }
    }
}

pub async fn metrics(
    State(state): State<SharedState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(pairs) = query?;
    let query = MetricsQuery::from_pairs(pairs);
    info!(
        refresh = query.force_refresh(),
        raw = query.raw(),
        "GET /metrics"
    );

    if query.raw() {
        let records = state.raw_records().await.map_err(|err| {
            error!(error = %err, "raw velocity query failed");
            AppError::unavailable(&err, state.development)
        })?;
        let count = records.len();
        let mut envelope = MetricsEnvelope::ok(records);
        envelope.count = Some(count);
        return Ok(Json(envelope).into_response());
    }

    let outcome = state
        .metrics(query.force_refresh())
        .await
        .map_err(|err| {
            error!(error = %err, "no cached velocity metrics to fall back on");
            AppError::unavailable(&err, state.development)
        })?;

    let mut envelope = MetricsEnvelope::ok(outcome.metrics);
    match outcome.freshness {
        Freshness::Fresh => envelope.cached = Some(false),
        Freshness::Cached { age } => {
            envelope.cached = Some(true);
            envelope.cache_age = Some(rounded_secs(age));
        }
        Freshness::Stale { age, error } => {
            envelope.cached = Some(true);
            envelope.stale = Some(true);
            envelope.cache_age = Some(rounded_secs(age));
            envelope.error = Some(error);
        }
    }
    Ok(Json(envelope).into_response())
}

// GET /status
#[derive(Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub table: String,
    pub cache: CacheStatus,
    pub counters: CounterSnapshot,
}

#[derive(Serialize)]
pub struct CacheStatus {
    pub populated: bool,
    pub age_secs: Option<u64>,
    pub ttl_secs: u64,
}

#[derive(Serialize)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub stale_served: u64,
    pub raw_queries: u64,
}

pub async fn status(State(state): State<SharedState>) -> Json<ServiceStatus> {
    let latest = state.cache.latest_at(tokio::time::Instant::now()).await;
    let counters = &state.counters;

    let requests = counters.requests.load(Ordering::Relaxed);
    let cache_hits = counters.cache_hits.load(Ordering::Relaxed);
    let cache_hit_rate = if requests > 0 {
        cache_hits as f64 / requests as f64
    } else {
        0.0
    };

    Json(ServiceStatus {
        service: "velocity-service".to_string(),
        table: state.table_name(),
        cache: CacheStatus {
            populated: latest.is_some(),
            age_secs: latest.map(|(_, age)| age.as_secs()),
            ttl_secs: state.cache.ttl().as_secs(),
        },
        counters: CounterSnapshot {
            requests,
            cache_hits,
            cache_hit_rate,
            refreshes: counters.refreshes.load(Ordering::Relaxed),
            refresh_failures: counters.refresh_failures.load(Ordering::Relaxed),
            stale_served: counters.stale_served.load(Ordering::Relaxed),
            raw_queries: counters.raw_queries.load(Ordering::Relaxed),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_require_literal_true() {
        let query = MetricsQuery {
            refresh: Some("true".to_string()),
            raw: Some("1".to_string()),
        };
        assert!(query.force_refresh());
        assert!(!query.raw());
        assert!(!MetricsQuery::default().force_refresh());
        assert!(!MetricsQuery {
            refresh: Some("TRUE".to_string()),
            raw: None
        }
        .force_refresh());
    }

    #[test]
    fn repeated_flags_keep_first_value() {
        let pairs = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        };

        let query = MetricsQuery::from_pairs(pairs(&[("refresh", "true"), ("refresh", "false")]));
        assert!(query.force_refresh());

        let query = MetricsQuery::from_pairs(pairs(&[
            ("refresh", "false"),
            ("utm", "x"),
            ("refresh", "true"),
            ("raw", "true"),
        ]));
        assert!(!query.force_refresh());
        assert!(query.raw());
    }

    #[test]
    fn cache_age_rounds_to_nearest_second() {
        assert_eq!(rounded_secs(Duration::from_millis(29_400)), 29);
        assert_eq!(rounded_secs(Duration::from_millis(29_500)), 30);
        assert_eq!(rounded_secs(Duration::ZERO), 0);
    }

    #[test]
    fn envelope_omits_unset_annotations() {
        let json = serde_json::to_value(MetricsEnvelope::ok(1)).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("cached").is_none());
        assert!(json.get("cacheAge").is_none());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
