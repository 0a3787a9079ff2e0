//! Isolated image-analysis sub-call.
//!
//! Vision-capable agent CLIs can only read local files, so image content
//! is analyzed in a separate, fully sandboxed one-shot run: stage the
//! files into a fresh sandbox, verify they are visible to a spawned
//! process (a known transient race on some filesystems), run the agent
//! with a filename-based prompt, and validate the result. The analysis
//! text is then spliced into the conversation according to the target
//! agent's injection policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::agent::{AnalysisInjection, CliAgent};
use crate::config::Config;
use crate::env::sensitive_var_names;
use crate::error::EngineError;
use crate::messages::{request_terms, ChatMessage, Role, ANALYSIS_CONTEXT_MARKER};
use crate::runner::{run_capture, run_with_retry, RetryPolicy, RunSpec, RunnerConfig};
use crate::sandbox::{SandboxHandle, SandboxManager};
use crate::sanitize::filter_text;

pub(crate) struct ImageAnalyzer {
    agent: Arc<dyn CliAgent>,
    sandboxes: SandboxManager,
    runner_config: RunnerConfig,
}

impl ImageAnalyzer {
    pub fn new(agent: Arc<dyn CliAgent>, config: &Config) -> Self {
        Self {
            agent,
            sandboxes: SandboxManager::default(),
            runner_config: RunnerConfig {
                overall_timeout: Duration::from_secs(config.analysis.timeout_secs),
                ..RunnerConfig::default()
            },
        }
    }

    #[cfg(test)]
    fn with_sandbox_manager(mut self, sandboxes: SandboxManager) -> Self {
        self.sandboxes = sandboxes;
        self
    }

    /// Analyzes the given image files and returns the description text.
    pub async fn analyze(
        &self,
        image_paths: &[PathBuf],
        user_prompt: Option<&str>,
    ) -> Result<String, EngineError> {
        if image_paths.is_empty() {
            return Err(EngineError::sandbox("no image files to analyze"));
        }

        let sandbox = self.sandboxes.create()?;
        let result = self.analyze_in(&sandbox, image_paths, user_prompt).await;
        self.sandboxes.destroy(sandbox);
        result
    }

    async fn analyze_in(
        &self,
        sandbox: &SandboxHandle,
        image_paths: &[PathBuf],
        user_prompt: Option<&str>,
    ) -> Result<String, EngineError> {
        let filenames = stage_files(sandbox.path(), image_paths)?;
        self.verify_visibility(sandbox, &filenames).await?;

        let prompt = build_analysis_prompt(
            self.agent.analysis_injection(),
            &filenames,
            user_prompt,
        );
        let terms = user_prompt
            .map(|p| request_terms(&[ChatMessage::user(p)]))
            .unwrap_or_default();

        info!(
            "Analyzing {} image(s) with {}",
            filenames.len(),
            self.agent.name()
        );

        let analysis = run_with_retry(RetryPolicy::default(), "image analysis", &terms, || {
            let mut spec = self
                .agent
                .build_run(sandbox.path(), &prompt, None);
            spec.env_remove = sensitive_var_names(&[]);
            run_capture(spec, self.runner_config)
        })
        .await?;

        Ok(filter_text(analysis.trim()))
    }

    /// Confirms staged files are visible to a freshly spawned process.
    /// Retried because the listing intermittently misses just-written
    /// files on some filesystems.
    async fn verify_visibility(
        &self,
        sandbox: &SandboxHandle,
        filenames: &[String],
    ) -> Result<(), EngineError> {
        for filename in filenames {
            run_with_retry(RetryPolicy::default(), "file visibility check", &[], || {
                let mut spec = RunSpec::new("ls", sandbox.path());
                spec.args = vec!["-l".to_string(), filename.clone()];
                run_capture(spec, self.runner_config)
            })
            .await?;
            debug!("Verified staged file is visible: {filename}");
        }
        Ok(())
    }
}

/// Copies the images into the sandbox and returns their bare filenames.
fn stage_files(sandbox: &Path, image_paths: &[PathBuf]) -> Result<Vec<String>, EngineError> {
    let mut filenames = Vec::with_capacity(image_paths.len());

    for source in image_paths {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                EngineError::sandbox(format!("image path has no filename: {}", source.display()))
            })?;

        std::fs::copy(source, sandbox.join(name)).map_err(|e| {
            EngineError::sandbox(format!("cannot stage {}: {e}", source.display()))
        })?;
        filenames.push(name.to_string());
    }

    Ok(filenames)
}

/// Builds the one-shot analysis prompt from staged filenames.
///
/// Argv-prompt CLIs (system-message injection policy) resolve `@file`
/// references themselves; stdin-prompt CLIs are pointed at the files and
/// told to read them.
fn build_analysis_prompt(
    injection: AnalysisInjection,
    filenames: &[String],
    user_prompt: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    match injection {
        AnalysisInjection::SystemMessage => {
            for filename in filenames {
                parts.push(format!("@{filename}"));
            }
            match user_prompt {
                Some(p) => parts.push(format!("Analyze these images and answer: {p}")),
                None => {
                    parts.push("Please analyze and describe these images in detail.".to_string());
                }
            }
            parts.join(" ")
        }
        AnalysisInjection::InlineUser => {
            if let [only] = filenames {
                parts.push(format!("There is an image file named: {only}"));
            } else {
                parts.push(format!("There are {} image files:", filenames.len()));
                for (i, filename) in filenames.iter().enumerate() {
                    parts.push(format!("  {}. {filename}", i + 1));
                }
            }
            parts.push(String::new());
            parts.push("Use the Read tool to view these image files.".to_string());
            parts.push(String::new());
            match user_prompt {
                Some(p) => parts.push(format!("Analyze the image(s) and answer: {p}")),
                None => parts
                    .push("Analyze and describe what you see in the image(s) in detail.".to_string()),
            }
            parts.join("\n")
        }
    }
}

/// Splices the analysis text into the conversation.
///
/// `InlineUser` appends a bracketed context block to the last user
/// message; `SystemMessage` adds a dedicated system turn.
pub(crate) fn inject_analysis(
    messages: &[ChatMessage],
    analysis: &str,
    policy: AnalysisInjection,
) -> Vec<ChatMessage> {
    let mut injected = messages.to_vec();

    match policy {
        AnalysisInjection::InlineUser => {
            if let Some(last_user) = injected.iter_mut().rev().find(|m| m.role == Role::User) {
                last_user
                    .content
                    .push_str(&format!("\n\n{ANALYSIS_CONTEXT_MARKER} {analysis}]"));
            } else {
                injected.push(ChatMessage::user(format!(
                    "{ANALYSIS_CONTEXT_MARKER} {analysis}]"
                )));
            }
        }
        AnalysisInjection::SystemMessage => {
            injected.push(ChatMessage::system(format!(
                "Image analysis results for the user's attached image(s): {analysis}"
            )));
        }
    }

    injected
}
