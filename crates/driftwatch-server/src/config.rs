use crate::rule_builder::{build_entity_rules, GlobalRuleConfig, RuleConfig};
use crate::scheduler::{MonitoredEntity, OrchestratorSettings};
use anyhow::{bail, Context};
use driftwatch_common::types::Entity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of entities checked concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-entity extractor timeout.
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    /// Points retained per numeric series.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Consecutive history-store failures before an entity is reported degraded.
    #[serde(default = "default_degraded_after_failures")]
    pub degraded_after_failures: u32,
    /// Tolerance when comparing numeric alert signatures.
    #[serde(default = "default_dedup_epsilon")]
    pub dedup_epsilon: f64,

    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    /// Rules attached to every entity matching their `entity_pattern`.
    #[serde(default)]
    pub rules: Vec<GlobalRuleConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    File,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_kind")]
    pub kind: ExtractorKind,
    /// Base directory for the file extractor's relative paths.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: default_extractor_kind(),
            base_dir: default_base_dir(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Passed through to the extractor untouched.
    #[serde(default)]
    pub descriptor: serde_json::Value,
    #[serde(default)]
    pub target_value: Option<f64>,
    #[serde(default)]
    pub tracked_fields: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl EntityConfig {
    pub fn to_entity(&self) -> Entity {
        Entity {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            descriptor: self.descriptor.clone(),
            target_value: self.target_value,
            tracked_fields: self.tracked_fields.clone(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    4
}

fn default_extract_timeout_secs() -> u64 {
    30
}

fn default_history_retention() -> usize {
    100
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_degraded_after_failures() -> u32 {
    3
}

fn default_dedup_epsilon() -> f64 {
    driftwatch_alert::dedup::DEFAULT_EPSILON
}

fn default_extractor_kind() -> ExtractorKind {
    ExtractorKind::File
}

fn default_base_dir() -> String {
    ".".to_string()
}

fn default_user_agent() -> String {
    concat!("driftwatch/", env!("CARGO_PKG_VERSION")).to_string()
}

impl MonitorConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        Self::parse(&content).with_context(|| format!("Invalid config file '{path}'"))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent == 0 {
            bail!("max_concurrent must be at least 1");
        }
        if self.history_retention == 0 {
            bail!("history_retention must be at least 1");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.extract_timeout_secs == 0 {
            bail!("extract_timeout_secs must be at least 1");
        }
        if !self.dedup_epsilon.is_finite() || self.dedup_epsilon < 0.0 {
            bail!("dedup_epsilon must be a non-negative number");
        }

        let mut seen = HashSet::new();
        for entity in &self.entities {
            if entity.id.trim().is_empty() {
                bail!("entity id must not be empty");
            }
            if !seen.insert(entity.id.as_str()) {
                bail!("duplicate entity id '{}'", entity.id);
            }
        }

        // rule construction catches missing targets, bad operators and id clashes
        self.monitored_entities().map(|_| ())
    }

    /// Builds every configured entity with its own and matching global rules.
    pub fn monitored_entities(&self) -> anyhow::Result<Vec<MonitoredEntity>> {
        self.entities
            .iter()
            .map(|cfg| {
                let entity = cfg.to_entity();
                let rules = build_entity_rules(&entity, &cfg.rules, &self.rules)
                    .with_context(|| format!("entity '{}'", entity.id))?;
                Ok(MonitoredEntity::new(entity, rules))
            })
            .collect()
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_concurrent: self.max_concurrent,
            extract_timeout: Duration::from_secs(self.extract_timeout_secs),
            history_retention: self.history_retention,
            degraded_after_failures: self.degraded_after_failures,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_common::types::{RuleKind, Severity};

    const SAMPLE: &str = r#"
poll_interval_secs = 600
max_concurrent = 2

[extractor]
kind = "http"

[[entities]]
id = "laptop-x1"
name = "Laptop X1"
target_value = 300.0
tracked_fields = ["price"]
descriptor = { url = "https://shop.example/api/x1", pointer = "/product" }

[[entities.rules]]
kind = "threshold_crossing"
field = "price"
operator = "lte"

[[entities.rules]]
kind = "state_transition"
id = "restock"
field = "in_stock"
severity = "critical"

[[entities]]
id = "changelog"
descriptor = { url = "https://example.org/changelog.json" }

[[entities.rules]]
kind = "structural_change"
headings = ["Breaking changes"]

[[rules]]
kind = "first_observation"

[[rules]]
kind = "significant_delta"
entity_pattern = "laptop-*"
field = "price"
direction = "drop"
baseline = "peak"
"#;

    #[test]
    fn parses_sample_config() {
        let config = MonitorConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.poll_interval_secs, 600);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.extract_timeout_secs, 30);
        assert_eq!(config.history_retention, 100);
        assert_eq!(config.extractor.kind, ExtractorKind::Http);
        assert_eq!(config.entities.len(), 2);
        assert_eq!(
            config.entities[0].descriptor["pointer"].as_str(),
            Some("/product")
        );

        let entities = config.monitored_entities().unwrap();
        let laptop = &entities[0];
        let kinds: Vec<RuleKind> = laptop.rules.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                RuleKind::ThresholdCrossing,
                RuleKind::StateTransition,
                RuleKind::FirstObservation,
                RuleKind::SignificantDelta,
            ]
        );
        assert_eq!(laptop.rules[1].id(), "restock");
        assert_eq!(laptop.rules[1].severity(), Severity::Critical);
        assert_eq!(laptop.rules[2].severity(), Severity::Info);

        let changelog = &entities[1];
        assert_eq!(changelog.entity.name, "changelog");
        let kinds: Vec<RuleKind> = changelog.rules.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![RuleKind::StructuralChange, RuleKind::FirstObservation]
        );
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = MonitorConfig::parse("").unwrap();
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.degraded_after_failures, 3);
        assert_eq!(config.extractor.kind, ExtractorKind::File);
        assert!(config.entities.is_empty());
    }

    #[test]
    fn rejects_duplicate_entities() {
        let err = MonitorConfig::parse(
            r#"
[[entities]]
id = "a"
[[entities]]
id = "a"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate entity id"));
    }

    #[test]
    fn rejects_threshold_without_target() {
        let err = MonitorConfig::parse(
            r#"
[[entities]]
id = "a"
[[entities.rules]]
kind = "threshold_crossing"
field = "price"
operator = "lte"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("target"), "{err:#}");
    }

    #[test]
    fn example_config_is_valid() {
        let config =
            MonitorConfig::parse(include_str!("../../../config/driftwatch.example.toml")).unwrap();
        let entities = config.monitored_entities().unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].rules.len(), 4);
        assert_eq!(entities[1].rules.len(), 2);
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(MonitorConfig::parse("max_concurrent = 0").is_err());
    }

    #[test]
    fn rejects_zero_extract_timeout() {
        let err = MonitorConfig::parse("extract_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("extract_timeout_secs"), "{err}");
    }

    #[test]
    fn rejects_rules_the_engine_cannot_honour() {
        let err = MonitorConfig::parse(
            r#"
[[entities]]
id = "a"
[[entities.rules]]
kind = "structural_change"
cooldown_secs = 9223372036854775807
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("cooldown_secs"), "{err:#}");

        let err = MonitorConfig::parse(
            r#"
[[entities]]
id = "laptop-x1"
tracked_fields = ["price"]

[[rules]]
kind = "significant_delta"
field = "rank"
baseline = "trough"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("tracked_fields"), "{err:#}");
    }
}
