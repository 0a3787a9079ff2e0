//! Gemini CLI adapter
//!
//! Invokes the Gemini CLI with the prompt as an argument:
//! ```bash
//! gemini -m gemini-2.5-flash -p "<prompt>" -s
//! ```
//!
//! `-s` enables the CLI's sandbox mode. This CLI honors a dedicated
//! system turn, so analysis context is delivered as a system message.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use super::{probe_version, AnalysisInjection, CliAgent};
use crate::config::GeminiConfig;
use crate::runner::RunSpec;

pub(crate) struct GeminiAgent {
    config: GeminiConfig,
}

impl GeminiAgent {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CliAgent for GeminiAgent {
    fn name(&self) -> &'static str {
        "Gemini"
    }

    fn analysis_injection(&self) -> AnalysisInjection {
        AnalysisInjection::SystemMessage
    }

    fn build_run(&self, sandbox: &Path, prompt: &str, model: Option<&str>) -> RunSpec {
        let model = model.unwrap_or(&self.config.model);

        let mut spec = RunSpec::new(&self.config.path, sandbox);
        spec.args = vec![
            "-m".to_string(),
            model.to_string(),
            "-p".to_string(),
            prompt.to_string(),
            "-s".to_string(),
        ];
        spec
    }

    async fn verify(&self) -> Result<String> {
        probe_version(&self.config.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_run_passes_prompt_as_argument() {
        let agent = GeminiAgent::new(GeminiConfig::default());
        let spec = agent.build_run(Path::new("/work"), "describe this", None);
        assert_eq!(spec.binary, "gemini");
        assert_eq!(
            spec.args,
            vec!["-m", "gemini-2.5-flash", "-p", "describe this", "-s"]
        );
        assert!(spec.stdin_payload.is_none());
    }

    #[test]
    fn test_request_model_overrides_configured_model() {
        let agent = GeminiAgent::new(GeminiConfig::default());
        let spec = agent.build_run(Path::new("/work"), "x", Some("gemini-2.5-pro"));
        assert!(spec.args.windows(2).any(|w| w == ["-m", "gemini-2.5-pro"]));
    }

    #[test]
    fn test_analysis_context_goes_to_system_message() {
        let agent = GeminiAgent::new(GeminiConfig::default());
        assert_eq!(agent.analysis_injection(), AnalysisInjection::SystemMessage);
    }
}
