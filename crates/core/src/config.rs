use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub undo: UndoConfig,
    #[serde(default)]
    pub corrections: CorrectionConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/autosort.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directories whose new arrivals are routed.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Configured destinations, as paths.
    #[serde(default)]
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Name-pass confidence below which images escalate.
    pub escalation_threshold: f32,
    pub auto_move_threshold: f32,
    pub suggest_threshold: f32,
    pub escalate_images: bool,
    pub escalate_documents: bool,
    /// Minimum meaningful characters for an extraction to count.
    pub min_extracted_chars: usize,
    /// How many recent corrections go into the digest sent to the service.
    pub digest_size: usize,
    pub smart_rename: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 0.7,
            auto_move_threshold: 0.85,
            suggest_threshold: 0.40,
            escalate_images: true,
            escalate_documents: true,
            min_extracted_chars: 20,
            digest_size: 10,
            smart_rename: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub debounce_ms: u64,
    pub rapid_window_ms: u64,
    pub min_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            rapid_window_ms: 2_000,
            min_batch_size: 3,
        }
    }
}

impl BatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub quick_delays_secs: Vec<u64>,
    pub patient_interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            quick_delays_secs: vec![2, 5, 10, 30, 60],
            patient_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    pub window_secs: u64,
    pub activity_cap: i64,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            window_secs: 10,
            activity_cap: 100,
        }
    }
}

impl UndoConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub retain: i64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self { retain: 50 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Optional directory of `*.toml` rule files seeded into the store.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// "openai" or "noop".
    pub name: String,
    pub text_model: String,
    pub vision_model: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            text_model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            timeout_secs: 30,
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(config::Environment::with_prefix("AUTOSORT").separator("__"));
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
