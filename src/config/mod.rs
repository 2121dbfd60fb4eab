pub mod parser;
pub mod utils;

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use ahash::AHashSet;

pub type Result<T> = std::result::Result<T, String>;

#[derive(Debug, Default)]
pub struct Config {
    pub keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub cohort: CohortConfig,
    pub concurrency: usize,
    pub drain_timeout: Duration,
    pub hostname: String,
    pub smtp_port: u16,
    pub smtp_timeout: Duration,
    pub http_timeout: Duration,
    pub tracking: TrackingConfig,
    pub archive_path: Option<PathBuf>,
    pub results: ResultsConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub upstream_handled_pct: f64,
    pub oob_pct: f64,
    pub fbl_pct: f64,
    pub open_pct: f64,
    pub open_again_pct: f64,
    pub click_pct: f64,
    pub click_again_pct: f64,
    pub weekly_shape: [f64; 7],
}

#[derive(Debug, Clone, Default)]
pub struct CohortConfig {
    pub prefix: String,
    pub digit_days: [AHashSet<u8>; 10],
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub domains: AHashSet<String>,
    pub user_agents: Vec<String>,
    pub cache_ttl: Duration,
    pub cache_ttl_neg: Duration,
}

#[derive(Debug, Clone)]
pub struct ResultsConfig {
    pub backend: ResultsBackend,
    pub url: String,
    pub namespace: String,
    pub retention: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsBackend {
    Memory,
    Redis,
}

impl Config {
    pub fn parse_engine(&self) -> Result<EngineConfig> {
        let mut digit_days: [AHashSet<u8>; 10] = Default::default();
        for (digit, days) in digit_days.iter_mut().enumerate() {
            let key = format!("cohort.days.{digit}");
            if self.keys.contains_key(&key) {
                for value in self.values(&key) {
                    let day = value
                        .parse::<u8>()
                        .ok()
                        .filter(|day| (1..=31).contains(day))
                        .ok_or_else(|| {
                            format!("Invalid day-of-month {:?} for key {:?}.", value, key)
                        })?;
                    days.insert(day);
                }
            } else {
                // No day set configured, digit is active every day
                days.extend(1..=31u8);
            }
        }

        // Seven open-rate multipliers, Sunday first
        let mut weekly_shape = [1.0f64; 7];
        if self.keys.contains_key("model.weekly-shape") {
            let values = self.values("model.weekly-shape").collect::<Vec<_>>();
            if values.len() != 7 {
                return Err(format!(
                    "Key \"model.weekly-shape\" must list 7 values, found {}.",
                    values.len()
                ));
            }
            for (slot, value) in weekly_shape.iter_mut().zip(values) {
                *slot = value.parse::<f64>().ok().filter(|v| *v >= 0.0).ok_or_else(
                    || format!("Invalid multiplier {value:?} for key \"model.weekly-shape\"."),
                )?;
            }
        }

        let user_agents = if let Some(path) = self.keys.get("tracking.user-agents") {
            let contents = std::fs::read_to_string(path)
                .map_err(|err| format!("Failed to read user-agent file {path:?}: {err}"))?;
            let agents = contents
                .lines()
                .map(|line| line.trim().trim_matches('"').to_string())
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>();
            if agents.is_empty() {
                return Err(format!("User-agent file {path:?} is empty."));
            }
            agents
        } else {
            vec![crate::USER_AGENT.to_string()]
        };

        Ok(EngineConfig {
            model: ModelConfig {
                upstream_handled_pct: self.percent("model.upstream-handled-percent")?,
                oob_pct: self.percent("model.oob-percent")?,
                fbl_pct: self.percent("model.fbl-percent")?,
                open_pct: self.percent("model.open-percent")?,
                open_again_pct: self.percent("model.open-again-percent")?,
                click_pct: self.percent("model.click-percent")?,
                click_again_pct: self.percent("model.click-again-percent")?,
                weekly_shape,
            },
            cohort: CohortConfig {
                prefix: self
                    .keys
                    .get("cohort.prefix")
                    .cloned()
                    .unwrap_or_default(),
                digit_days,
            },
            concurrency: self
                .value::<usize>("scheduler.concurrency")?
                .filter(|n| *n > 0)
                .unwrap_or(4),
            drain_timeout: self
                .duration("scheduler.drain-timeout")?
                .unwrap_or(Duration::from_secs(120)),
            hostname: self
                .keys
                .get("smtp.hostname")
                .cloned()
                .unwrap_or_else(|| "mail-sink.local".to_string()),
            smtp_port: self.value::<u16>("smtp.port")?.unwrap_or(25),
            smtp_timeout: self
                .duration("smtp.timeout")?
                .unwrap_or(Duration::from_secs(30)),
            http_timeout: self
                .duration("http.timeout")?
                .unwrap_or(Duration::from_secs(5)),
            tracking: TrackingConfig {
                domains: self
                    .values("tracking.domains")
                    .map(|v| v.to_lowercase())
                    .collect(),
                user_agents,
                cache_ttl: self
                    .duration("tracking.cache-ttl")?
                    .unwrap_or(Duration::from_secs(3600)),
                cache_ttl_neg: self
                    .duration("tracking.cache-ttl-negative")?
                    .unwrap_or(Duration::from_secs(300)),
            },
            archive_path: self.keys.get("spool.archive").map(PathBuf::from),
            results: ResultsConfig {
                backend: match self.keys.get("results.backend").map(|v| v.as_str()) {
                    Some("redis") => ResultsBackend::Redis,
                    Some("memory") | None => ResultsBackend::Memory,
                    Some(other) => {
                        return Err(format!("Unknown results backend {other:?}."));
                    }
                },
                url: self
                    .keys
                    .get("results.url")
                    .cloned()
                    .unwrap_or_else(|| "redis://127.0.0.1".to_string()),
                namespace: format!(
                    "{}:{}",
                    self.keys
                        .get("results.namespace")
                        .map(|v| v.as_str())
                        .unwrap_or("mail-sink"),
                    self.keys
                        .get("results.instance")
                        .map(|v| v.as_str())
                        .unwrap_or("0")
                ),
                retention: self
                    .duration("results.retention")?
                    .unwrap_or(Duration::from_secs(30 * 86400)),
            },
        })
    }

    fn percent(&self, key: &str) -> Result<f64> {
        Ok(self
            .value::<f64>(key)?
            .map(|pct| {
                if (0.0..=100.0).contains(&pct) {
                    Ok(pct)
                } else {
                    Err(format!("Value for key {key:?} must be a percentage."))
                }
            })
            .transpose()?
            .unwrap_or(0.0))
    }
}

impl CohortConfig {
    // Is open/click simulation enabled for this digit on this day of month?
    pub fn digit_active(&self, digit: u8, day_of_month: u8) -> bool {
        self.digit_days
            .get(digit as usize)
            .map_or(false, |days| days.contains(&day_of_month))
    }

    // Fraction of recipient digits eligible for engagement on this day
    pub fn density(&self, day_of_month: u8) -> f64 {
        self.digit_days
            .iter()
            .filter(|days| days.contains(&day_of_month))
            .count() as f64
            / 10.0
    }
}
