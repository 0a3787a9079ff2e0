//! Qwen CLI adapter
//!
//! Invokes the Qwen CLI in sandbox mode with the prompt on stdin:
//! ```bash
//! qwen [-m <model>] -s
//! ```
//!
//! The configured model "auto" omits `-m` entirely and lets the CLI pick.
//! The CLI leaks debug banners into stdout unless its debug/verbose
//! switches are forced off, so those are pinned in the child environment.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use super::{probe_version, AnalysisInjection, CliAgent};
use crate::config::QwenConfig;
use crate::runner::RunSpec;

/// Model value that defers model choice to the CLI.
const MODEL_AUTO: &str = "auto";

pub(crate) struct QwenAgent {
    config: QwenConfig,
}

impl QwenAgent {
    pub fn new(config: QwenConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CliAgent for QwenAgent {
    fn name(&self) -> &'static str {
        "Qwen"
    }

    fn analysis_injection(&self) -> AnalysisInjection {
        AnalysisInjection::InlineUser
    }

    fn build_run(&self, sandbox: &Path, prompt: &str, model: Option<&str>) -> RunSpec {
        let model = model.unwrap_or(&self.config.model);

        let mut args = Vec::new();
        if model != MODEL_AUTO {
            args.push("-m".to_string());
            args.push(model.to_string());
        }
        args.push("-s".to_string());

        let mut spec = RunSpec::new(&self.config.path, sandbox);
        spec.args = args;
        spec.stdin_payload = Some(prompt.to_string());
        spec.env_set = vec![
            ("DEBUG".to_string(), "false".to_string()),
            ("DEBUG_MODE".to_string(), "false".to_string()),
            ("VERBOSE".to_string(), "false".to_string()),
            ("NO_COLOR".to_string(), "1".to_string()),
        ];
        spec
    }

    async fn verify(&self) -> Result<String> {
        probe_version(&self.config.path).await
    }
}
