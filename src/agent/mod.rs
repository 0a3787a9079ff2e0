//! CLI agent adapters.
//!
//! One adapter per supported agent binary:
//! - Claude: `claude -p --dangerously-skip-permissions`, prompt on stdin
//! - Gemini: `gemini -m <model> -p <prompt> -s`, prompt as an argument
//! - Qwen: `qwen [-m <model>] -s`, prompt on stdin
//!
//! Adapters only describe the invocation (binary, flags, prompt channel,
//! extra child environment); the runner executes it. The adapter also
//! declares how image-analysis context is injected for its agent.

mod claude;
mod gemini;
#[cfg(test)]
pub(crate) mod mock;
mod qwen;

pub(crate) use claude::ClaudeAgent;
pub(crate) use gemini::GeminiAgent;
pub(crate) use qwen::QwenAgent;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::runner::{run_capture, RunSpec, RunnerConfig};

/// How analysis results from a prior image sub-call are handed to the
/// agent on the follow-up request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnalysisInjection {
    /// Appended to the last user message inside a bracketed context marker.
    InlineUser,
    /// Delivered as an additional system message.
    SystemMessage,
}

/// Adapter for one agent CLI.
#[async_trait]
pub(crate) trait CliAgent: Send + Sync {
    /// Agent name for display and logs.
    fn name(&self) -> &'static str;

    /// How analysis context is injected for this agent.
    fn analysis_injection(&self) -> AnalysisInjection;

    /// Describes one invocation: binary, flags, prompt channel, and the
    /// child-only environment overrides. `model` overrides the configured
    /// default when given.
    fn build_run(&self, sandbox: &Path, prompt: &str, model: Option<&str>) -> RunSpec;

    /// Checks the binary responds at all; returns its version line.
    async fn verify(&self) -> Result<String>;
}

/// Supported agent providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Provider {
    /// Claude CLI agent.
    #[default]
    Claude,
    /// Gemini CLI agent.
    Gemini,
    /// Qwen CLI agent.
    Qwen,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Gemini => write!(f, "gemini"),
            Self::Qwen => write!(f, "qwen"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "qwen" => Ok(Self::Qwen),
            _ => anyhow::bail!("Unknown agent provider: '{s}'. Supported: claude, gemini, qwen"),
        }
    }
}

/// Builds the configured adapter.
pub(crate) fn make_agent(provider: Provider, config: &Config) -> std::sync::Arc<dyn CliAgent> {
    match provider {
        Provider::Claude => std::sync::Arc::new(ClaudeAgent::new(config.agent.claude.clone())),
        Provider::Gemini => std::sync::Arc::new(GeminiAgent::new(config.agent.gemini.clone())),
        Provider::Qwen => std::sync::Arc::new(QwenAgent::new(config.agent.qwen.clone())),
    }
}

/// Shared `--version` probe used by the adapters' `verify`.
pub(super) async fn probe_version(binary: &str) -> Result<String> {
    let cwd = std::env::temp_dir();
    let mut spec = RunSpec::new(binary, cwd);
    spec.args = vec!["--version".to_string()];

    let config = RunnerConfig {
        overall_timeout: Duration::from_secs(15),
        ..RunnerConfig::default()
    };

    let output = run_capture(spec, config).await?;
    Ok(output.lines().next().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_display() {
        assert_eq!(format!("{}", Provider::Claude), "claude");
        assert_eq!(format!("{}", Provider::Gemini), "gemini");
        assert_eq!(format!("{}", Provider::Qwen), "qwen");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("claude".parse::<Provider>().unwrap(), Provider::Claude);
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!("qwen".parse::<Provider>().unwrap(), Provider::Qwen);
        assert!("cursor".parse::<Provider>().is_err());
    }

    #[tokio::test]
    async fn test_probe_version_reports_missing_binary() {
        let result = probe_version("ferry-no-such-binary").await;
        assert!(result.is_err());
    }
}
