use crate::client::Sampling;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection and sampling settings for one remote model
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// OpenAI-compatible API endpoint
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    /// Model identifier
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    /// Stop sequences, omitted from the request when empty
    pub stop: Vec<String>,
    /// Per-request timeout; unset leaves timing to the transport
    pub request_timeout_secs: Option<u64>,
}

impl ApiConfig {
    /// Low-temperature JSON judge defaults
    pub fn judge_default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            env_var_api_key: default_env_var_api_key(),
            model: default_model(),
            temperature: 0.01,
            top_p: 0.1,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: Vec::new(),
            request_timeout_secs: None,
        }
    }

    /// Defaults for the model under test
    pub fn generator_default() -> Self {
        Self {
            frequency_penalty: 1.0,
            presence_penalty: 1.0,
            stop: vec!["<|im_end|>".to_string()],
            ..Self::judge_default()
        }
    }

    pub fn sampling(&self) -> Sampling {
        Sampling {
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            stop: self.stop.clone(),
        }
    }
}

fn default_api_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_workers() -> usize {
    100
}

/// Judge model settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(from = "RawJudgeConfig")]
pub struct JudgeConfig {
    #[serde(flatten)]
    pub api: ApiConfig,
    /// Upper bound on concurrent judge calls per table
    pub max_workers: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::judge_default(),
            max_workers: default_max_workers(),
        }
    }
}

/// Settings for the model under test
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(from = "RawApiConfig")]
pub struct GeneratorConfig {
    #[serde(flatten)]
    pub api: ApiConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::generator_default(),
        }
    }
}

/// API section as written in the file; unset keys keep the section's defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawApiConfig {
    api_endpoint: Option<String>,
    env_var_api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
    stop: Option<Vec<String>>,
    request_timeout_secs: Option<u64>,
}

impl RawApiConfig {
    fn over(self, base: ApiConfig) -> ApiConfig {
        ApiConfig {
            api_endpoint: self.api_endpoint.unwrap_or(base.api_endpoint),
            env_var_api_key: self.env_var_api_key.unwrap_or(base.env_var_api_key),
            model: self.model.unwrap_or(base.model),
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.unwrap_or(base.top_p),
            frequency_penalty: self.frequency_penalty.unwrap_or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.unwrap_or(base.presence_penalty),
            stop: self.stop.unwrap_or(base.stop),
            request_timeout_secs: self.request_timeout_secs.or(base.request_timeout_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJudgeConfig {
    #[serde(flatten)]
    api: RawApiConfig,
    max_workers: Option<usize>,
}

impl From<RawJudgeConfig> for JudgeConfig {
    fn from(raw: RawJudgeConfig) -> Self {
        Self {
            api: raw.api.over(ApiConfig::judge_default()),
            max_workers: raw.max_workers.unwrap_or_else(default_max_workers),
        }
    }
}

impl From<RawApiConfig> for GeneratorConfig {
    fn from(raw: RawApiConfig) -> Self {
        Self {
            api: raw.over(ApiConfig::generator_default()),
        }
    }
}

/// Directories of each pipeline stage
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw benchmark tables as downloaded
    pub raw_dir: PathBuf,
    pub prepared_dir: PathBuf,
    pub evaluated_dir: PathBuf,
    pub extracted_dir: PathBuf,
    pub judged_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("."),
            prepared_dir: PathBuf::from("prepared"),
            evaluated_dir: PathBuf::from("evaluated"),
            extracted_dir: PathBuf::from("evaluated/extracted"),
            judged_dir: PathBuf::from("evaluated/judged"),
        }
    }
}

/// Which benchmark tables get special handling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchmarksConfig {
    /// Benchmarks whose answers cite numbered references
    pub reference_files: Vec<String>,
    /// Benchmarks that pass through preparation unchanged
    pub normal_files: Vec<String>,
    /// Judge-stage tables scored with the reasoning-extended contract
    pub reasoning_tables: Vec<String>,
}

impl Default for BenchmarksConfig {
    fn default() -> Self {
        Self {
            reference_files: vec!["hard-qa-with-multiple-references_test.csv".to_string()],
            normal_files: vec![
                "hard-reasoning-de_test.csv".to_string(),
                "hard-reasoning-en_test.csv".to_string(),
                "summarize-meeting-attendee-topic_test.csv".to_string(),
                "summarize-meeting-topic_test.csv".to_string(),
            ],
            reasoning_tables: vec![
                "extracted_evaluated_hard-reasoning-de_test.csv".to_string(),
                "extracted_evaluated_hard-reasoning-en_test.csv".to_string(),
            ],
        }
    }
}

impl BenchmarksConfig {
    pub fn is_reasoning_table(&self, file_name: &str) -> bool {
        self.reasoning_tables.iter().any(|t| t == file_name)
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub judge: JudgeConfig,
    pub generator: GeneratorConfig,
    pub paths: PathsConfig,
    pub benchmarks: BenchmarksConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(config.judge.max_workers > 0, "judge.max_workers must be at least 1");
        Ok(config)
    }
}
