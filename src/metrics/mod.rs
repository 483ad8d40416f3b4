use prometheus::{Counter, CounterVec, GaugeVec, Opts, Registry};
use std::sync::Arc;

use crate::cache::PatternKind;

/// Prometheus metrics for a postings list cache
#[derive(Clone)]
pub struct CacheMetrics {
    // Counters, labeled by pattern kind
    pub hits: CounterVec,
    pub misses: CounterVec,
    pub puts: CounterVec,
    pub evictions: CounterVec,

    // Purge counters
    pub purges: Counter,
    pub purged_entries: Counter,
    pub rejected_puts: Counter,

    // Current occupancy, labeled by pattern kind
    pub entries: GaugeVec,
    pub bytes: GaugeVec,

    registry: Arc<Registry>,
}

impl CacheMetrics {
    /// Create a new CacheMetrics instance with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let hits = CounterVec::new(
            Opts::new("sepia_cache_hits_total", "Cache hits by pattern kind"),
            &["kind"],
        )?;
        registry.register(Box::new(hits.clone()))?;

        let misses = CounterVec::new(
            Opts::new("sepia_cache_misses_total", "Cache misses by pattern kind"),
            &["kind"],
        )?;
        registry.register(Box::new(misses.clone()))?;

        let puts = CounterVec::new(
            Opts::new("sepia_cache_puts_total", "Cache inserts by pattern kind"),
            &["kind"],
        )?;
        registry.register(Box::new(puts.clone()))?;

        let evictions = CounterVec::new(
            Opts::new(
                "sepia_cache_evictions_total",
                "Entries evicted by capacity pressure, by pattern kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(evictions.clone()))?;

        let purges = Counter::with_opts(Opts::new(
            "sepia_cache_purges_total",
            "Segment purges executed",
        ))?;
        registry.register(Box::new(purges.clone()))?;

        let purged_entries = Counter::with_opts(Opts::new(
            "sepia_cache_purged_entries_total",
            "Entries removed by segment purges",
        ))?;
        registry.register(Box::new(purged_entries.clone()))?;

        let rejected_puts = Counter::with_opts(Opts::new(
            "sepia_cache_rejected_puts_total",
            "Puts dropped because their segment was already purged",
        ))?;
        registry.register(Box::new(rejected_puts.clone()))?;

        let entries = GaugeVec::new(
            Opts::new("sepia_cache_entries", "Live cache entries by pattern kind"),
            &["kind"],
        )?;
        registry.register(Box::new(entries.clone()))?;

        let bytes = GaugeVec::new(
            Opts::new("sepia_cache_bytes", "Tracked cache bytes by pattern kind"),
            &["kind"],
        )?;
        registry.register(Box::new(bytes.clone()))?;

        Ok(Self {
            hits,
            misses,
            puts,
            evictions,
            purges,
            purged_entries,
            rejected_puts,
            entries,
            bytes,
            registry: Arc::new(registry),
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn record_hit(&self, kind: PatternKind) {
        self.hits.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_miss(&self, kind: PatternKind) {
        self.misses.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_put(&self, kind: PatternKind, bytes: u64) {
        self.puts.with_label_values(&[kind.as_str()]).inc();
        self.entries.with_label_values(&[kind.as_str()]).add(1.0);
        self.bytes
            .with_label_values(&[kind.as_str()])
            .add(bytes as f64);
    }

    pub fn record_replace(&self, kind: PatternKind, old_bytes: u64, new_bytes: u64) {
        self.puts.with_label_values(&[kind.as_str()]).inc();
        self.bytes
            .with_label_values(&[kind.as_str()])
            .add(new_bytes as f64 - old_bytes as f64);
    }

    pub fn record_eviction(&self, kind: PatternKind, bytes: u64) {
        self.evictions.with_label_values(&[kind.as_str()]).inc();
        self.record_removed(kind, bytes);
    }

    pub fn record_purge(&self, entries_removed: usize) {
        self.purges.inc();
        self.purged_entries.inc_by(entries_removed as f64);
    }

    pub fn record_rejected_put(&self) {
        self.rejected_puts.inc();
    }

    /// Account an entry leaving the cache for any reason
    pub fn record_removed(&self, kind: PatternKind, bytes: u64) {
        self.entries.with_label_values(&[kind.as_str()]).sub(1.0);
        self.bytes
            .with_label_values(&[kind.as_str()])
            .sub(bytes as f64);
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_miss_counters() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.record_hit(PatternKind::Term);
        metrics.record_hit(PatternKind::Term);
        metrics.record_miss(PatternKind::Regexp);

        assert_eq!(metrics.hits.with_label_values(&["term"]).get(), 2.0);
        assert_eq!(metrics.misses.with_label_values(&["regexp"]).get(), 1.0);
    }

    #[test]
    fn test_occupancy_gauges() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.record_put(PatternKind::Search, 100);
        metrics.record_put(PatternKind::Search, 50);
        metrics.record_eviction(PatternKind::Search, 100);

        assert_eq!(metrics.entries.with_label_values(&["search"]).get(), 1.0);
        assert_eq!(metrics.bytes.with_label_values(&["search"]).get(), 50.0);
        assert_eq!(metrics.evictions.with_label_values(&["search"]).get(), 1.0);
    }

    #[test]
    fn test_purge_counters() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.record_purge(3);
        metrics.record_purge(0);

        assert_eq!(metrics.purges.get(), 2.0);
        assert_eq!(metrics.purged_entries.get(), 3.0);
    }
}
