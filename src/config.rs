use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::agent::Provider;
use crate::detect::DetectorStrategy;

const CONFIG_FILE: &str = "ferry.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Agent configuration - selects and configures the CLI agent binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Which agent provider to use: "claude", "gemini", or "qwen"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Claude-specific configuration
    #[serde(default)]
    pub claude: ClaudeConfig,

    /// Gemini-specific configuration
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Qwen-specific configuration
    #[serde(default)]
    pub qwen: QwenConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            claude: ClaudeConfig::default(),
            gemini: GeminiConfig::default(),
            qwen: QwenConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Parse the provider string into a Provider enum
    pub fn get_provider(&self) -> Result<Provider> {
        self.provider.parse()
    }
}

fn default_provider() -> String {
    "claude".to_string()
}

/// Claude CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Path to the Claude CLI
    /// - Default: "claude"
    /// - Custom: "/path/to/claude"
    #[serde(default = "default_claude_path")]
    pub path: String,

    /// Model to use (optional)
    /// - Examples: "opus", "sonnet"
    #[serde(default)]
    pub model: Option<String>,

    /// Skip permission prompts (required for non-interactive use)
    #[serde(default = "default_true")]
    pub skip_permissions: bool,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            path: default_claude_path(),
            model: None,
            skip_permissions: true,
        }
    }
}

fn default_claude_path() -> String {
    "claude".to_string()
}

/// Gemini CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Path to the Gemini CLI
    #[serde(default = "default_gemini_path")]
    pub path: String,

    /// Model to use
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            path: default_gemini_path(),
            model: default_gemini_model(),
        }
    }
}

fn default_gemini_path() -> String {
    "gemini".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

/// Qwen CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QwenConfig {
    /// Path to the Qwen CLI
    #[serde(default = "default_qwen_path")]
    pub path: String,

    /// Model to use; "auto" lets the CLI pick
    #[serde(default = "default_qwen_model")]
    pub model: String,
}

impl Default for QwenConfig {
    fn default() -> Self {
        Self {
            path: default_qwen_path(),
            model: default_qwen_model(),
        }
    }
}

fn default_qwen_path() -> String {
    "qwen".to_string()
}

fn default_qwen_model() -> String {
    "auto".to_string()
}

/// Format-requirement detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Strategy: "cascade" (rule list) or "confidence" (weighted score)
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Score needed for the confidence strategy to require formatting
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// XML tool names demonstrated in format reminders
    #[serde(default = "default_known_tools")]
    pub known_tools: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            confidence_threshold: default_confidence_threshold(),
            known_tools: default_known_tools(),
        }
    }
}

impl DetectionConfig {
    pub fn get_strategy(&self) -> Result<DetectorStrategy> {
        self.strategy.parse()
    }
}

fn default_strategy() -> String {
    "cascade".to_string()
}

fn default_confidence_threshold() -> f64 {
    crate::detect::DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_known_tools() -> Vec<String> {
    vec![
        "attempt_completion".to_string(),
        "ask_followup_question".to_string(),
    ]
}

/// Process runner timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Single-read poll timeout in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Hard ceiling on one agent run, in seconds
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_secs: u64,

    /// Grace period between terminate and kill, in seconds
    #[serde(default = "default_grace_timeout")]
    pub grace_timeout_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout(),
            overall_timeout_secs: default_overall_timeout(),
            grace_timeout_secs: default_grace_timeout(),
        }
    }
}

impl RunnerSettings {
    pub fn to_runner_config(&self) -> crate::runner::RunnerConfig {
        crate::runner::RunnerConfig {
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            overall_timeout: Duration::from_secs(self.overall_timeout_secs),
            grace_timeout: Duration::from_secs(self.grace_timeout_secs),
            ..crate::runner::RunnerConfig::default()
        }
    }
}

fn default_poll_timeout() -> u64 {
    1
}

fn default_overall_timeout() -> u64 {
    600
}

fn default_grace_timeout() -> u64 {
    2
}

/// Environment sanitization settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Extra variable names to strip, on top of the built-in set
    #[serde(default)]
    pub extra_sensitive: Vec<String>,
}

/// Image-analysis sub-call settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Ceiling for one analysis sub-call, in seconds
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_analysis_timeout(),
        }
    }
}

fn default_analysis_timeout() -> u64 {
    90
}

// Default value functions
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}
