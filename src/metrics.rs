//! Metrics collaborator seam.
//!
//! The dispatcher reports request timings through the [`Metrics`] trait;
//! concrete sinks (statsd, Prometheus, ...) are injected at construction.
//! The sink must tolerate concurrent updates, since sibling sub-requests in
//! a dispatch tree may complete at the same time.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;

static INVALID_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static regex"));

/// Injected metrics sink.
pub trait Metrics: Send + Sync {
    /// Normalize a stat name into the sink's accepted character set.
    fn normalize_name(&self, name: &str) -> String;

    /// Record the elapsed time since `start` under each of `names`.
    fn end_timing(&self, names: &[String], start: Instant);
}

/// Replace characters outside `[A-Za-z0-9._-]` with underscores.
#[must_use]
pub fn normalize_stat_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").into_owned()
}

/// Sink that discards all measurements. Default when none is injected.
#[derive(Debug, Default)]
pub struct NullMetrics;

impl Metrics for NullMetrics {
    fn normalize_name(&self, name: &str) -> String {
        normalize_stat_name(name)
    }

    fn end_timing(&self, _names: &[String], _start: Instant) {}
}

/// In-memory sink recording every timing sample, keyed by stat name.
///
/// Lock-free via [`DashMap`] so concurrent sibling dispatches can record
/// without coordination. Intended for tests and local inspection.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    samples: DashMap<String, Vec<u64>>,
}

impl RecordingMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples recorded under `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.samples.get(name).map_or(0, |v| v.len())
    }

    /// All stat names with at least one sample.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.samples.iter().map(|e| e.key().clone()).collect()
    }
}

impl Metrics for RecordingMetrics {
    fn normalize_name(&self, name: &str) -> String {
        normalize_stat_name(name)
    }

    fn end_timing(&self, names: &[String], start: Instant) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        for name in names {
            self.samples.entry(name.clone()).or_default().push(elapsed_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_replaces_invalid_chars() {
        assert_eq!(normalize_stat_name("a/v1/{x}.GET."), "a_v1__x_.GET.");
    }

    #[test]
    fn recording_sink_counts_per_name() {
        let metrics = RecordingMetrics::new();
        let start = Instant::now();
        metrics.end_timing(
            &["p.GET.200".to_string(), "p.GET.ALL".to_string()],
            start,
        );
        assert_eq!(metrics.count("p.GET.200"), 1);
        assert_eq!(metrics.count("p.GET.ALL"), 1);
        assert_eq!(metrics.count("p.GET.5xx"), 0);
    }
}
