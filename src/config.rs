use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::calendar::DEFAULT_UTC_OFFSET_MINUTES;

/// Server settings, read from `FAIRSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a rewrite.
    pub compact_threshold: u64,
    /// Offset for organisations that never set their own.
    pub utc_offset_minutes: i32,
    pub completer_interval: Duration,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "fairslot".into(),
            max_connections: 256,
            compact_threshold: 1000,
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            completer_interval: Duration::from_secs(60),
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            port: parsed(&lookup, "FAIRSLOT_PORT").unwrap_or(defaults.port),
            bind: lookup("FAIRSLOT_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("FAIRSLOT_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("FAIRSLOT_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "FAIRSLOT_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "FAIRSLOT_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            utc_offset_minutes: parsed(&lookup, "FAIRSLOT_UTC_OFFSET_MINUTES").unwrap_or(defaults.utc_offset_minutes),
            completer_interval: parsed(&lookup, "FAIRSLOT_COMPLETER_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.completer_interval),
            tls_cert: lookup("FAIRSLOT_TLS_CERT"),
            tls_key: lookup("FAIRSLOT_TLS_KEY"),
            metrics_port: parsed(&lookup, "FAIRSLOT_METRICS_PORT"),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config_from(&[]), Config::default());
        assert_eq!(Config::default().utc_offset_minutes, -180);
    }

    #[test]
    fn values_are_read() {
        let cfg = config_from(&[
            ("FAIRSLOT_PORT", "6543"),
            ("FAIRSLOT_DATA_DIR", "/var/lib/fairslot"),
            ("FAIRSLOT_UTC_OFFSET_MINUTES", " 60 "),
            ("FAIRSLOT_COMPLETER_INTERVAL_SECS", "5"),
            ("FAIRSLOT_METRICS_PORT", "9100"),
            ("FAIRSLOT_MAX_CONNECTIONS", "32"),
            ("FAIRSLOT_COMPACT_THRESHOLD", "50000"),
            ("FAIRSLOT_PASSWORD", "s3cret"),
            ("FAIRSLOT_TLS_CERT", "/etc/fairslot/server.crt"),
        ]);
        assert_eq!(cfg.port, 6543);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/fairslot"));
        assert_eq!(cfg.utc_offset_minutes, 60);
        assert_eq!(cfg.completer_interval, Duration::from_secs(5));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.max_connections, 32);
        assert_eq!(cfg.compact_threshold, 50_000);
        assert_eq!(cfg.password, "s3cret");
        assert_eq!(cfg.tls_cert.as_deref(), Some("/etc/fairslot/server.crt"));
        assert_eq!(cfg.tls_key, None);
    }

    #[test]
    fn negative_offset_and_bad_interval() {
        let cfg = config_from(&[
            ("FAIRSLOT_UTC_OFFSET_MINUTES", "-300"),
            ("FAIRSLOT_COMPLETER_INTERVAL_SECS", "soon"),
            ("FAIRSLOT_COMPACT_THRESHOLD", "-5"),
        ]);
        assert_eq!(cfg.utc_offset_minutes, -300);
        assert_eq!(cfg.completer_interval, Duration::from_secs(60));
        assert_eq!(cfg.compact_threshold, 1000);
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = config_from(&[("FAIRSLOT_PORT", "not-a-port"), ("FAIRSLOT_MAX_CONNECTIONS", "-1")]);
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
    }
}
