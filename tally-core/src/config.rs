use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Default Bedrock model for the prompt chain.
pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TallyConfig {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AwsConfig {
    /// Falls back to the default provider chain when unset.
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub profile: Option<String>,
    pub max_attempts: u32,
    pub force_path_style: bool,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint_url: None,
            profile: None,
            max_attempts: 3,
            force_path_style: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub model_id: String,
    pub max_tokens: i32,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_tokens: 2048,
            temperature: 0.0,
        }
    }
}

/// How a run treats results left by a previous run.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Wipe the download folder and results file before processing.
    #[default]
    Overwrite,
    /// Keep earlier records and skip objects that already have one.
    Append,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub results_path: String,
    pub download_dir: String,
    pub mode: WriteMode,
    pub continue_on_error: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_path: "processed_invoice_output.json".to_string(),
            download_dir: "invoice".to_string(),
            mode: WriteMode::Overwrite,
            continue_on_error: false,
        }
    }
}

impl OutputConfig {
    /// Results file path with `~` and `$VARS` expanded.
    pub fn results_path(&self) -> PathBuf {
        expand_path(&self.results_path)
    }

    /// Download folder with `~` and `$VARS` expanded.
    pub fn download_dir(&self) -> PathBuf {
        expand_path(&self.download_dir)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

/// Optional overrides for the three prompt templates.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptsConfig {
    pub extract: Option<String>,
    pub filter: Option<String>,
    pub summarize: Option<String>,
}

impl TallyConfig {
    /// Load from a TOML file, then apply `TALLY__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TALLY").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Like [`TallyConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("TALLY").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()
    }
}

fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!(path = raw, error = %e, "Could not expand path, using it verbatim");
            PathBuf::from(raw)
        }
    }
}
