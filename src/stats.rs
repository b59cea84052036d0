//! Stats sinks
//!
//! Views and fragments meter themselves through the [`StatsClient`] trait.
//! A sink is derived per scope with [`StatsClient::with_tags`]; the view uses
//! this to give each fragment a `slice:<n>` scoped child.
//!
//! Implementations:
//! - [`NopStatsClient`]: discards everything (the default)
//! - [`MetricsStatsClient`]: forwards to the `metrics` facade
//! - [`MemoryStatsClient`]: keeps counts in memory

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Metering interface consumed by the storage layer
pub trait StatsClient: Send + Sync + fmt::Debug {
    /// Tags attached to every metric emitted by this client
    fn tags(&self) -> Vec<String>;

    /// Derive a child client carrying the union of the current and given tags
    fn with_tags(&self, tags: &[&str]) -> Arc<dyn StatsClient>;

    /// Increment the counter `name` by `value`
    fn count(&self, name: &str, value: u64);
}

/// Merge two tag sets, sorted and deduplicated
fn union_tags(base: &[String], extra: &[&str]) -> Vec<String> {
    let mut tags: Vec<String> = base
        .iter()
        .cloned()
        .chain(extra.iter().map(|t| t.to_string()))
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

/// Stats client that drops every measurement
#[derive(Debug, Clone, Copy, Default)]
pub struct NopStatsClient;

impl StatsClient for NopStatsClient {
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    fn with_tags(&self, _tags: &[&str]) -> Arc<dyn StatsClient> {
        Arc::new(NopStatsClient)
    }

    fn count(&self, _name: &str, _value: u64) {}
}

/// Stats client backed by the `metrics` facade
///
/// Metric names get a `slicedb_` prefix. Tags of the form `key:value` become
/// labels `key = value`; bare tags become `tag = "true"`.
#[derive(Debug, Clone, Default)]
pub struct MetricsStatsClient {
    tags: Vec<String>,
}

impl MetricsStatsClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn labels(&self) -> Vec<metrics::Label> {
        self.tags
            .iter()
            .map(|tag| match tag.split_once(':') {
                Some((key, value)) => metrics::Label::new(key.to_string(), value.to_string()),
                None => metrics::Label::new(tag.clone(), "true"),
            })
            .collect()
    }
}

impl StatsClient for MetricsStatsClient {
    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn with_tags(&self, tags: &[&str]) -> Arc<dyn StatsClient> {
        Arc::new(Self {
            tags: union_tags(&self.tags, tags),
        })
    }

    fn count(&self, name: &str, value: u64) {
        metrics::counter!(format!("slicedb_{}", name), self.labels()).increment(value);
    }
}

/// In-memory stats client
///
/// Children derived with `with_tags` share the parent's table, so totals can
/// be read from whichever handle the caller kept.
#[derive(Clone, Default)]
pub struct MemoryStatsClient {
    tags: Vec<String>,
    counts: Arc<Mutex<HashMap<(Vec<String>, String), u64>>>,
}

impl MemoryStatsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of `name` across every tag scope
    pub fn total(&self, name: &str) -> u64 {
        self.counts
            .lock()
            .iter()
            .filter(|((_, n), _)| n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Value of `name` recorded under exactly `tags`
    pub fn count_for(&self, name: &str, tags: &[&str]) -> u64 {
        let key = (union_tags(&[], tags), name.to_string());
        self.counts.lock().get(&key).copied().unwrap_or(0)
    }
}

impl fmt::Debug for MemoryStatsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStatsClient")
            .field("tags", &self.tags)
            .finish()
    }
}

impl StatsClient for MemoryStatsClient {
    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn with_tags(&self, tags: &[&str]) -> Arc<dyn StatsClient> {
        Arc::new(Self {
            tags: union_tags(&self.tags, tags),
            counts: Arc::clone(&self.counts),
        })
    }

    fn count(&self, name: &str, value: u64) {
        let key = (self.tags.clone(), name.to_string());
        *self.counts.lock().entry(key).or_insert(0) += value;
    }
}
