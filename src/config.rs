use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::engine::NO_SHOW_MINUTES;

/// Runtime settings for a venue, read from `TABLESIDE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub table_count: usize,
    pub default_capacity: u32,
    /// Per-table capacity, e.g. `T1=2,T4=6`.
    pub capacity_overrides: HashMap<String, u32>,
    pub sweep_interval: Duration,
    pub no_show_minutes: i64,
    pub queue_depth: usize,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_count: 25,
            default_capacity: 4,
            capacity_overrides: HashMap::new(),
            sweep_interval: Duration::from_secs(30),
            no_show_minutes: NO_SHOW_MINUTES,
            queue_depth: 1024,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable values keep their default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            table_count: get("TABLESIDE_TABLE_COUNT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.table_count),
            default_capacity: get("TABLESIDE_DEFAULT_CAPACITY")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.default_capacity),
            capacity_overrides: get("TABLESIDE_CAPACITY_OVERRIDES")
                .map(|s| parse_overrides(&s))
                .unwrap_or_default(),
            sweep_interval: parsed("TABLESIDE_SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            no_show_minutes: get("TABLESIDE_NO_SHOW_MINUTES")
                .and_then(|s| s.trim().parse().ok())
                .filter(|m: &i64| *m > 0)
                .unwrap_or(defaults.no_show_minutes),
            queue_depth: get("TABLESIDE_QUEUE_DEPTH")
                .and_then(|s| s.trim().parse().ok())
                .filter(|d: &usize| *d > 0)
                .unwrap_or(defaults.queue_depth),
            metrics_port: get("TABLESIDE_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }
}

/// `"T1=2, T4=6"` → `{T1: 2, T4: 6}`. Bad entries are skipped with a warning.
pub fn parse_overrides(s: &str) -> HashMap<String, u32> {
    let mut out = HashMap::new();
    for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry
            .split_once('=')
            .and_then(|(id, cap)| Some((id.trim(), cap.trim().parse::<u32>().ok()?)))
            .filter(|(id, cap)| !id.is_empty() && *cap > 0);
        match parsed {
            Some((id, cap)) => {
                out.insert(id.to_string(), cap);
            }
            None => warn!("ignoring capacity override {entry:?}"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }

    #[test]
    fn reads_every_key() {
        let config = Config::from_lookup(lookup(&[
            ("TABLESIDE_TABLE_COUNT", "12"),
            ("TABLESIDE_DEFAULT_CAPACITY", "6"),
            ("TABLESIDE_CAPACITY_OVERRIDES", "T1=2,T4=8"),
            ("TABLESIDE_SWEEP_INTERVAL_SECS", "5"),
            ("TABLESIDE_NO_SHOW_MINUTES", "45"),
            ("TABLESIDE_QUEUE_DEPTH", "64"),
            ("TABLESIDE_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.table_count, 12);
        assert_eq!(config.default_capacity, 6);
        assert_eq!(config.capacity_overrides.get("T4"), Some(&8));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.no_show_minutes, 45);
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("TABLESIDE_TABLE_COUNT", "many"),
            ("TABLESIDE_SWEEP_INTERVAL_SECS", "0"),
            ("TABLESIDE_NO_SHOW_MINUTES", "-3"),
            ("TABLESIDE_METRICS_PORT", "70000"),
        ]));
        assert_eq!(config.table_count, 25);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.no_show_minutes, 30);
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn overrides_skip_bad_entries() {
        let map = parse_overrides(" T1 = 2 , junk, T2=, =4, T3=0, T5=10,");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("T1"), Some(&2));
        assert_eq!(map.get("T5"), Some(&10));
    }
}
