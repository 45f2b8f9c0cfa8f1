use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::{DAY, HOUR, MINUTE, Ms, SECOND};

/// Knobs for the booking engine itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum lead time between cancellation and the booking's start.
    pub cancel_window_ms: Ms,
    /// How long a cached free-slot listing may be served.
    pub cache_ttl: Duration,
    /// Upper bound on waiting for a per-expert/per-user lock.
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cancel_window_ms: HOUR,
            cache_ttl: Duration::from_secs(3600),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Knobs for the reconciliation worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_interval: Duration,
    /// Reminders go out for confirmed bookings starting in
    /// `[now + reminder_lead_ms, now + reminder_lead_ms + reminder_window_ms)`.
    pub reminder_lead_ms: Ms,
    pub reminder_window_ms: Ms,
    pub notification_retention_ms: Ms,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(600),
            reminder_lead_ms: 60 * MINUTE,
            reminder_window_ms: 10 * MINUTE,
            notification_retention_ms: 30 * DAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub engine: EngineConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            engine: EngineConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Build from `CONSULTD_*` environment variables. Missing or unparseable
    /// values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| parse::<u64>(&s));
        let defaults = Config::default();

        let engine = EngineConfig {
            cancel_window_ms: parsed("CONSULTD_CANCEL_WINDOW_SECS")
                .and_then(|s| scaled(s, SECOND))
                .unwrap_or(defaults.engine.cancel_window_ms),
            cache_ttl: parsed("CONSULTD_CACHE_TTL_SECS")
                .map_or(defaults.engine.cache_ttl, Duration::from_secs),
            lock_timeout: parsed("CONSULTD_LOCK_TIMEOUT_MS")
                .map_or(defaults.engine.lock_timeout, Duration::from_millis),
        };

        let worker = WorkerConfig {
            tick_interval: parsed("CONSULTD_TICK_SECS")
                .filter(|s| *s > 0)
                .map_or(defaults.worker.tick_interval, Duration::from_secs),
            reminder_lead_ms: parsed("CONSULTD_REMINDER_LEAD_SECS")
                .and_then(|s| scaled(s, SECOND))
                .unwrap_or(defaults.worker.reminder_lead_ms),
            reminder_window_ms: parsed("CONSULTD_REMINDER_WINDOW_SECS")
                .filter(|s| *s > 0)
                .and_then(|s| scaled(s, SECOND))
                .unwrap_or(defaults.worker.reminder_window_ms),
            notification_retention_ms: parsed("CONSULTD_RETENTION_DAYS")
                .and_then(|d| scaled(d, DAY))
                .unwrap_or(defaults.worker.notification_retention_ms),
        };

        Self {
            data_dir: lookup("CONSULTD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("CONSULTD_METRICS_PORT").and_then(|s| parse(&s)),
            compact_threshold: parsed("CONSULTD_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            engine,
            worker,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("consultd.wal")
    }
}

fn parse<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

/// `count` units in milliseconds; `None` if that does not fit.
fn scaled(count: u64, unit: Ms) -> Option<Ms> {
    Ms::try_from(count).ok()?.checked_mul(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_booking_policy() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.engine.cancel_window_ms, HOUR);
        assert_eq!(cfg.engine.cache_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.worker.tick_interval, Duration::from_secs(600));
        assert_eq!(cfg.worker.reminder_lead_ms, 60 * MINUTE);
        assert_eq!(cfg.worker.reminder_window_ms, 10 * MINUTE);
        assert_eq!(cfg.worker.notification_retention_ms, 30 * DAY);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/consultd.wal"));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("CONSULTD_DATA_DIR", "/var/lib/consultd"),
            ("CONSULTD_METRICS_PORT", "9100"),
            ("CONSULTD_TICK_SECS", "30"),
            ("CONSULTD_CANCEL_WINDOW_SECS", "7200"),
            ("CONSULTD_RETENTION_DAYS", "7"),
            ("CONSULTD_COMPACT_THRESHOLD", "50"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/consultd"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.worker.tick_interval, Duration::from_secs(30));
        assert_eq!(cfg.engine.cancel_window_ms, 2 * HOUR);
        assert_eq!(cfg.worker.notification_retention_ms, 7 * DAY);
        assert_eq!(cfg.compact_threshold, 50);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("CONSULTD_TICK_SECS", "soon"),
            ("CONSULTD_METRICS_PORT", "99999"),
            ("CONSULTD_REMINDER_WINDOW_SECS", "0"),
        ]));
        assert_eq!(cfg.worker.tick_interval, Duration::from_secs(600));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.worker.reminder_window_ms, 10 * MINUTE);
    }

    #[test]
    fn oversized_durations_fall_back_to_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("CONSULTD_CANCEL_WINDOW_SECS", "18446744073709551615"),
            ("CONSULTD_REMINDER_LEAD_SECS", "9223372036854775807"),
            ("CONSULTD_REMINDER_WINDOW_SECS", "9223372036854776"),
            ("CONSULTD_RETENTION_DAYS", "106751991168"),
        ]));
        assert_eq!(cfg.engine.cancel_window_ms, HOUR);
        assert_eq!(cfg.worker.reminder_lead_ms, 60 * MINUTE);
        assert_eq!(cfg.worker.reminder_window_ms, 10 * MINUTE);
        assert_eq!(cfg.worker.notification_retention_ms, 30 * DAY);
    }
}
