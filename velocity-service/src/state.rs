use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};
use velocity_core::{Aggregator, Config, VelocityError, VelocityMetrics, VelocityRecord};

pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metrics: VelocityMetrics,
    pub captured_at: Instant,
}

impl CacheEntry {
    fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

/// Single-slot metrics cache. Each successful refresh replaces the slot.
///
/// Time is passed in via the `_at` methods so freshness is decided against
/// the caller's notion of "now".
pub struct MetricsCache {
    entry: RwLock<Option<CacheEntry>>,
    ttl: Duration,
}

impl MetricsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached metrics and their age, only while younger than the TTL.
    pub async fn fresh_at(&self, now: Instant) -> Option<(VelocityMetrics, Duration)> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .map(|e| (e, e.age_at(now)))
            .filter(|(_, age)| *age < self.ttl)
            .map(|(e, age)| (e.metrics.clone(), age))
    }

    /// Cached metrics and their age, however old.
    pub async fn latest_at(&self, now: Instant) -> Option<(VelocityMetrics, Duration)> {
        let entry = self.entry.read().await;
        entry.as_ref().map(|e| (e.metrics.clone(), e.age_at(now)))
    }

    /// Metrics captured at or after `since`, if any.
    pub async fn captured_since(&self, since: Instant) -> Option<CacheEntry> {
        let entry = self.entry.read().await;
        entry.as_ref().filter(|e| e.captured_at >= since).cloned()
    }

    pub async fn store_at(&self, metrics: VelocityMetrics, now: Instant) {
        *self.entry.write().await = Some(CacheEntry {
            metrics,
            captured_at: now,
        });
    }
}

/// How a metrics response was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Just computed from the warehouse.
    Fresh,
    /// Served from cache within the freshness window.
    Cached { age: Duration },
    /// Served from cache because the refresh failed.
    Stale { age: Duration, error: String },
}

#[derive(Debug, Clone)]
pub struct MetricsOutcome {
    pub metrics: VelocityMetrics,
    pub freshness: Freshness,
}

#[derive(Default)]
pub struct ServiceCounters {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub refreshes: AtomicU64,
    pub refresh_failures: AtomicU64,
    pub stale_served: AtomicU64,
    pub raw_queries: AtomicU64,
}

pub struct AppState {
    aggregator: Aggregator,
    pub cache: MetricsCache,
    /// Present when concurrent refreshes should share one warehouse query.
    refresh_gate: Option<Mutex<()>>,
    pub development: bool,
    pub counters: ServiceCounters,
}

impl AppState {
    pub fn new(aggregator: Aggregator, config: &Config) -> Self {
        Self {
            aggregator,
            cache: MetricsCache::new(config.ttl_duration()),
            refresh_gate: config.cache.single_flight.then(|| Mutex::new(())),
            development: config.is_development(),
            counters: ServiceCounters::default(),
        }
    }

    pub fn table_name(&self) -> String {
        self.aggregator.table().to_string()
    }

    /// Mapped warehouse rows, bypassing the cache entirely.
    pub async fn raw_records(&self) -> Result<Vec<VelocityRecord>, VelocityError> {
        self.counters.raw_queries.fetch_add(1, Ordering::Relaxed);
        self.aggregator.query_velocity_data().await
    }

    /// Serve metrics from cache when fresh, otherwise refresh. A failed
    /// refresh falls back to whatever is cached, however old.
    pub async fn metrics(&self, force_refresh: bool) -> Result<MetricsOutcome, VelocityError> {
        let requested_at = Instant::now();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        if !force_refresh {
            if let Some((metrics, age)) = self.cache.fresh_at(requested_at).await {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                info!(age_secs = age.as_secs(), "serving cached velocity metrics");
                return Ok(MetricsOutcome {
                    metrics,
                    freshness: Freshness::Cached { age },
                });
            }
        }

        let _gate = match &self.refresh_gate {
            Some(gate) => {
                let guard = gate.lock().await;
                // Coalesce: someone refreshed while we waited
                if let Some(entry) = self.cache.captured_since(requested_at).await {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(MetricsOutcome {
                        freshness: Freshness::Cached {
                            age: entry.age_at(Instant::now()),
                        },
                        metrics: entry.metrics,
                    });
                }
                Some(guard)
            }
            None => None,
        };

        info!(force_refresh, "fetching fresh velocity metrics");
        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        match self.aggregator.get_velocity_metrics().await {
            Ok(metrics) => {
                self.cache.store_at(metrics.clone(), Instant::now()).await;
                Ok(MetricsOutcome {
                    metrics,
                    freshness: Freshness::Fresh,
                })
            }
            Err(err) => {
                self.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "velocity metrics refresh failed");

                let Some((metrics, age)) = self.cache.latest_at(Instant::now()).await else {
                    return Err(err);
                };
                self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                warn!(age_secs = age.as_secs(), "serving stale velocity metrics");
                Ok(MetricsOutcome {
                    metrics,
                    freshness: Freshness::Stale {
                        age,
                        error: err.to_string(),
                    },
                })
            }
        }
    }
}
