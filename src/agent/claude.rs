//! Claude CLI adapter
//!
//! Invokes the Claude CLI in print mode:
//! ```bash
//! claude -p --dangerously-skip-permissions [--model opus]
//! ```
//!
//! The prompt is piped via stdin; output streams on stdout. Analysis
//! context is injected inline into the last user message, which this CLI
//! follows more reliably than a separate system turn.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use super::{probe_version, AnalysisInjection, CliAgent};
use crate::config::ClaudeConfig;
use crate::runner::RunSpec;

pub(crate) struct ClaudeAgent {
    config: ClaudeConfig,
}

impl ClaudeAgent {
    pub fn new(config: ClaudeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CliAgent for ClaudeAgent {
    fn name(&self) -> &'static str {
        "Claude"
    }

    fn analysis_injection(&self) -> AnalysisInjection {
        AnalysisInjection::InlineUser
    }

    fn build_run(&self, sandbox: &Path, prompt: &str, model: Option<&str>) -> RunSpec {
        let mut args = vec!["-p".to_string()];

        if self.config.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        let model = model.map(str::to_string).or_else(|| self.config.model.clone());
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model);
        }

        let mut spec = RunSpec::new(&self.config.path, sandbox);
        spec.args = args;
        spec.stdin_payload = Some(prompt.to_string());
        spec
    }

    async fn verify(&self) -> Result<String> {
        probe_version(&self.config.path).await
    }
}
