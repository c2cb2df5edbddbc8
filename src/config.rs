use crate::error::SimError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MIN_COUNT: usize = 1;
pub const BATCH_CUTOFFS: [u32; 4] = [100, 300, 1000, 3000];
pub const BATCH_THRESHOLDS: [f64; 5] = [1.0, 0.9, 0.8, 0.7, 0.6];

/// Per-run matching options, carried on every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct MatchOptions {
    pub threshold: f64,
    pub cutoff: Option<u32>,
    pub min_count: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            cutoff: None,
            min_count: DEFAULT_MIN_COUNT,
        }
    }
}

impl MatchOptions {
    pub fn new(threshold: f64, cutoff: u32) -> Self {
        Self {
            threshold,
            cutoff: Some(cutoff),
            ..Self::default()
        }
    }

    pub fn require_cutoff(&self) -> Result<u32, SimError> {
        self.cutoff.ok_or(SimError::MissingOption("cutoff"))
    }

    /// Name of the result file for this option set, e.g. `0.9_100`.
    pub fn artifact_name(&self) -> Result<String, SimError> {
        let cutoff = self.require_cutoff()?;
        let mut name = format!("{}_{}", format_threshold(self.threshold), cutoff);
        if self.min_count != DEFAULT_MIN_COUNT {
            name.push_str(&format!("_{}", self.min_count));
        }
        Ok(name)
    }
}

/// `1.0` stays `1.0` rather than `1`, so names match across runs.
fn format_threshold(threshold: f64) -> String {
    if threshold.fract() == 0.0 {
        format!("{:.1}", threshold)
    } else {
        threshold.to_string()
    }
}

/// Process settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub blacklist_dir: PathBuf,
    pub matches_dir: PathBuf,
    pub poll_interval: Duration,
    pub stall_timeout: Option<Duration>,
    pub workers: usize,
    pub max_attempts: u32,
    pub queue_name: String,
    pub job_lease: Duration,
    pub database_url: Option<String>,
    pub search_url: Option<String>,
    pub search_index: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blacklist_dir: PathBuf::from("lib/blacklists"),
            matches_dir: PathBuf::from("matches"),
            poll_interval: Duration::from_millis(1000),
            stall_timeout: None,
            workers: 4,
            max_attempts: 5,
            queue_name: "match_similar_app".to_string(),
            job_lease: Duration::from_secs(600),
            database_url: None,
            search_url: None,
            search_index: "signatures".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SimError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset or empty keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SimError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut settings = Self::default();

        if let Some(dir) = get("SIMDUP_BLACKLIST_DIR") {
            settings.blacklist_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("SIMDUP_MATCHES_DIR") {
            settings.matches_dir = PathBuf::from(dir);
        }
        if let Some(ms) = get("SIMDUP_POLL_INTERVAL_MS") {
            settings.poll_interval = Duration::from_millis(parse("SIMDUP_POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(secs) = get("SIMDUP_STALL_TIMEOUT_SECS") {
            settings.stall_timeout =
                Some(Duration::from_secs(parse("SIMDUP_STALL_TIMEOUT_SECS", &secs)?));
        }
        if let Some(n) = get("SIMDUP_WORKERS") {
            settings.workers = parse::<usize>("SIMDUP_WORKERS", &n)?.max(1);
        }
        if let Some(n) = get("SIMDUP_MAX_ATTEMPTS") {
            settings.max_attempts = parse::<u32>("SIMDUP_MAX_ATTEMPTS", &n)?.max(1);
        }
        if let Some(name) = get("SIMDUP_QUEUE_NAME") {
            settings.queue_name = name;
        }
        if let Some(secs) = get("SIMDUP_JOB_LEASE_SECS") {
            settings.job_lease = Duration::from_secs(parse("SIMDUP_JOB_LEASE_SECS", &secs)?);
        }
        settings.database_url = get("SIMDUP_DATABASE_URL");
        settings.search_url = get("SIMDUP_SEARCH_URL");
        if let Some(index) = get("SIMDUP_SEARCH_INDEX") {
            settings.search_index = index;
        }
        Ok(settings)
    }

    pub fn require_database_url(&self) -> Result<&str, SimError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| SimError::Config("SIMDUP_DATABASE_URL is not set".to_string()))
    }

    pub fn require_search_url(&self) -> Result<&str, SimError> {
        self.search_url
            .as_deref()
            .ok_or_else(|| SimError::Config("SIMDUP_SEARCH_URL is not set".to_string()))
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SimError> {
    value
        .trim()
        .parse()
        .map_err(|_| SimError::Config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_artifact_name() {
        assert_eq!(MatchOptions::new(0.9, 100).artifact_name().unwrap(), "0.9_100");
        assert_eq!(MatchOptions::new(1.0, 3000).artifact_name().unwrap(), "1.0_3000");
        let mut opts = MatchOptions::new(0.7, 300);
        opts.min_count = 5;
        assert_eq!(opts.artifact_name().unwrap(), "0.7_300_5");
    }

    #[test]
    fn test_missing_cutoff() {
        let err = MatchOptions::default().artifact_name().unwrap_err();
        assert!(matches!(err, SimError::MissingOption("cutoff")));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.stall_timeout, None);
        assert_eq!(settings.queue_name, "match_similar_app");
        assert!(settings.require_database_url().is_err());
    }

    #[test]
    fn test_settings_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("SIMDUP_POLL_INTERVAL_MS", "250"),
            ("SIMDUP_STALL_TIMEOUT_SECS", "30"),
            ("SIMDUP_WORKERS", "0"),
            ("SIMDUP_SEARCH_URL", "http://localhost:9200"),
            ("SIMDUP_MATCHES_DIR", ""),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.stall_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.matches_dir, PathBuf::from("matches"));
        assert_eq!(settings.require_search_url().unwrap(), "http://localhost:9200");
    }

    #[test]
    fn test_settings_rejects_garbage() {
        let err = Settings::from_lookup(|k| (k == "SIMDUP_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }
}
