use std::path::PathBuf;

use crate::limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Settings the engine consults while evaluating; passed in explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Count canceled bookings (up to their cancellation) toward usage limits.
    pub count_canceled: bool,
    pub export_page_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            count_canceled: false,
            export_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Process configuration, read from `COMMONS_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub data_file: Option<PathBuf>,
    pub rules_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub settings: EngineSettings,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let export_page_size = lookup("COMMONS_EXPORT_PAGE_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| (1..=MAX_PAGE_SIZE).contains(n))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self {
            data_file: lookup("COMMONS_DATA_FILE").map(PathBuf::from),
            rules_file: lookup("COMMONS_RULES_FILE").map(PathBuf::from),
            metrics_port: lookup("COMMONS_METRICS_PORT").and_then(|s| s.parse().ok()),
            settings: EngineSettings {
                count_canceled: lookup("COMMONS_COUNT_CANCELED").is_some_and(|s| is_on(&s)),
                export_page_size,
            },
        }
    }
}

fn is_on(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "on" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

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
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.settings.export_page_size, 25);
    }

    #[test]
    fn reads_all_variables() {
        let config = Config::from_lookup(lookup(&[
            ("COMMONS_DATA_FILE", "/tmp/data.json"),
            ("COMMONS_RULES_FILE", "/tmp/rules.json"),
            ("COMMONS_COUNT_CANCELED", "on"),
            ("COMMONS_EXPORT_PAGE_SIZE", "50"),
            ("COMMONS_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.data_file, Some(PathBuf::from("/tmp/data.json")));
        assert_eq!(config.rules_file, Some(PathBuf::from("/tmp/rules.json")));
        assert_eq!(config.metrics_port, Some(9100));
        assert!(config.settings.count_canceled);
        assert_eq!(config.settings.export_page_size, 50);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("COMMONS_COUNT_CANCELED", "maybe"),
            ("COMMONS_EXPORT_PAGE_SIZE", "0"),
            ("COMMONS_METRICS_PORT", "http"),
        ]));
        assert!(!config.settings.count_canceled);
        assert_eq!(config.settings.export_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.metrics_port, None);
    }
}
