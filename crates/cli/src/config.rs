use proto::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use agent::anthropic::DEFAULT_ANTHROPIC_MODEL;
use agent::llm::DEFAULT_OPENAI_MODEL;
use agent::{PlaceholderPolicy, RetryPolicy, RunnerConfig};

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    /// Returns the canonical provider name used in config.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    /// Model used when `agent.model` is empty.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
        }
    }

    /// Vendor-specific key variable consulted when no key is configured.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                field: "agent.provider".to_string(),
                reason: format!("unknown provider '{other}' (expected anthropic | openai)"),
            }),
        }
    }
}

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM and loop settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Prompt template location.
    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Tool provider switches.
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Agent model/provider config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// anthropic | openai.
    pub provider: String,
    /// Model ID. Leave empty to use the provider default.
    pub model: String,
    /// API key (env overrides applied at load time; see `Config::load`).
    pub api_key: String,
    /// Explicit API base URL; vendor default when empty.
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub enable_prompt_caching: bool,
    /// Tool-use rounds per run before giving up.
    pub max_iterations: usize,
    /// Whole-run wall clock budget in seconds; 0 disables it.
    pub run_timeout_secs: u64,
    pub max_parallel_tools: usize,
    pub retry: RetryConfig,
    /// USD per million tokens, for cost estimates.
    pub pricing: Option<PricingConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic.name().to_string(),
            model: String::new(),
            api_key: String::new(),
            base_url: None,
            max_tokens: agent::runtime::DEFAULT_MAX_TOKENS,
            temperature: agent::runtime::DEFAULT_TEMPERATURE,
            enable_prompt_caching: false,
            max_iterations: agent::runtime::DEFAULT_MAX_ITERATIONS,
            run_timeout_secs: 120,
            max_parallel_tools: agent::runtime::DEFAULT_MAX_PARALLEL_TOOLS,
            retry: RetryConfig::default(),
            pricing: None,
        }
    }
}

impl AgentConfig {
    /// Parses `provider`.
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        self.provider.parse()
    }

    /// Returns the effective model ID.
    pub fn effective_model(&self) -> Result<String, ConfigError> {
        if self.model.is_empty() {
            Ok(self.provider_kind()?.default_model().to_string())
        } else {
            Ok(self.model.clone())
        }
    }

    /// Returns `base_url` when set to something non-empty.
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|url| !url.is_empty())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_iterations: self.max_iterations,
            run_timeout: (self.run_timeout_secs > 0)
                .then(|| Duration::from_secs(self.run_timeout_secs)),
            max_parallel_tools: self.max_parallel_tools,
        }
    }
}

/// HTTP retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            request_timeout_secs: 60,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..RetryPolicy::default()
        }
    }
}

/// Token prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// Prompt template settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Template root directory.
    pub dir: String,
    /// System prompt template under `dir`; empty uses the built-in prompt.
    pub system: String,
    pub placeholders: PlaceholderPolicy,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: "prompts".to_string(),
            system: String::new(),
            placeholders: PlaceholderPolicy::Lenient,
        }
    }
}

/// Tool provider switches.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolsConfig {
    /// Providers disabled at startup.
    pub disabled: Vec<String>,
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("concierge.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".concierge").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = match config_path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(&path)?)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        debug!(
            provider = %config.agent.provider,
            model = %config.agent.model,
            base_url = ?config.agent.effective_base_url(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Parses TOML without env overrides or validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Applies `CONCIERGE_*` overrides, then the vendor key fallback.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.is_empty());

        if let Some(provider) = non_empty("CONCIERGE_PROVIDER") {
            self.agent.provider = provider;
        }
        if let Some(key) = non_empty("CONCIERGE_API_KEY") {
            self.agent.api_key = key;
        }
        if let Some(model) = non_empty("CONCIERGE_MODEL") {
            self.agent.model = model;
        }
        if self.agent.api_key.is_empty()
            && let Ok(kind) = self.agent.provider_kind()
            && let Some(key) = non_empty(kind.api_key_env())
        {
            debug!(source = kind.api_key_env(), "API key resolved from vendor env");
            self.agent.api_key = key;
        }
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent.provider_kind()?;
        if self.agent.max_iterations == 0 {
            return Err(invalid("agent.max_iterations", "must be at least 1"));
        }
        if self.agent.max_parallel_tools == 0 {
            return Err(invalid("agent.max_parallel_tools", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(invalid("agent.temperature", "must be within 0.0..=2.0"));
        }
        if self.agent.max_tokens == 0 {
            return Err(invalid("agent.max_tokens", "must be at least 1"));
        }
        if self.agent.retry.request_timeout_secs == 0 {
            return Err(invalid("agent.retry.request_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
