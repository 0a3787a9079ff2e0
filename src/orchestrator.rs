//! Per-request composition root.
//!
//! Sequences one completion request end to end: detect format
//! requirements, compose the layered prompt, provision a sandbox, strip
//! the sensitive environment, run the agent, sanitize its output, and
//! guarantee cleanup. The relay task owns the sandbox handle and the
//! environment guard, so cleanup runs on success, failure, and consumer
//! hang-up alike.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agent::CliAgent;
use crate::config::Config;
use crate::detect::{self, Detection, DetectorStrategy};
use crate::env::{sensitive_var_names, EnvironmentGuard};
use crate::error::EngineError;
use crate::messages::{has_analysis_context, render_transcript, ChatMessage};
use crate::prompt::PromptComposer;
use crate::runner::{spawn_streaming, RunnerConfig, StreamEvent};
use crate::sandbox::{SandboxHandle, SandboxManager};
use crate::sanitize::StreamSanitizer;

/// One inbound completion request.
#[derive(Debug, Clone)]
pub(crate) struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the configured default model when given.
    pub model: Option<String>,
    /// Skips detection and forces XML format enforcement.
    pub force_format: bool,
}

pub(crate) struct Orchestrator {
    agent: Arc<dyn CliAgent>,
    sandboxes: SandboxManager,
    composer: PromptComposer,
    strategy: DetectorStrategy,
    confidence_threshold: f64,
    runner_config: RunnerConfig,
    extra_sensitive: Vec<String>,
}

impl Orchestrator {
    pub fn new(agent: Arc<dyn CliAgent>, config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            agent,
            sandboxes: SandboxManager::default(),
            composer: PromptComposer::new(config.detection.known_tools.clone()),
            strategy: config.detection.get_strategy()?,
            confidence_threshold: config.detection.confidence_threshold,
            runner_config: config.runner.to_runner_config(),
            extra_sensitive: config.env.extra_sensitive.clone(),
        })
    }

    #[cfg(test)]
    fn with_sandbox_manager(mut self, sandboxes: SandboxManager) -> Self {
        self.sandboxes = sandboxes;
        self
    }

    /// Runs detection for this request, honoring the explicit override.
    pub fn detect(&self, request: &CompletionRequest) -> Detection {
        if request.force_format {
            Detection::forced()
        } else {
            detect::detect(self.strategy, &request.messages, self.confidence_threshold)
        }
    }

    /// Runs one request and returns the sanitized event stream.
    ///
    /// Only sandbox-creation and spawn failures are returned directly;
    /// everything after the process starts arrives as stream events.
    pub fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, EngineError> {
        let detection = self.detect(&request);
        debug!(
            "Format detection: required={} ({})",
            detection.required, detection.strength
        );

        let body = render_transcript(&request.messages);
        let analysis_context = has_analysis_context(&request.messages);
        let prompt = self.composer.compose(&body, &detection, analysis_context);

        let sandbox = self.sandboxes.create()?;
        let sensitive = sensitive_var_names(&self.extra_sensitive);

        // Parent-side guard for agent CLIs that re-read our environment
        // through helper processes; the child itself gets `env_remove`.
        let guard = EnvironmentGuard::remove(&sensitive);

        let mut spec =
            self.agent
                .build_run(sandbox.path(), &prompt, request.model.as_deref());
        spec.env_remove = sensitive;

        info!(
            "Running {} in {}",
            self.agent.name(),
            sandbox.path().display()
        );

        let inner = match spawn_streaming(spec, self.runner_config) {
            Ok(rx) => rx,
            Err(err) => {
                drop(guard);
                self.sandboxes.destroy(sandbox);
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(relay(
            inner,
            tx,
            sandbox,
            guard,
            self.sandboxes.clone(),
        ));
        Ok(rx)
    }

    /// Runs one request to completion and returns the sanitized text.
    pub async fn complete(&self, request: CompletionRequest) -> Result<String, EngineError> {
        let mut rx = self.stream_completion(request)?;
        let mut output = String::new();

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Text(text) => output.push_str(&text),
                StreamEvent::Completed => return Ok(output),
                StreamEvent::Failed(err) => return Err(err),
            }
        }

        Err(EngineError::process_exit(
            None,
            "completion stream ended without a terminal event".to_string(),
        ))
    }
}

/// Forwards runner events through the sanitizer and performs cleanup.
///
/// Owning the sandbox handle and environment guard here is what makes
/// cleanup unconditional: whichever way this task exits, the guard drops
/// and the sandbox is destroyed. Dropping `inner` on early exit tells the
/// runner to terminate the child.
async fn relay(
    mut inner: mpsc::Receiver<StreamEvent>,
    tx: mpsc::Sender<StreamEvent>,
    sandbox: SandboxHandle,
    guard: EnvironmentGuard,
    sandboxes: SandboxManager,
) {
    let mut sanitizer = StreamSanitizer::new();

    while let Some(event) = inner.recv().await {
        match event {
            StreamEvent::Text(text) => {
                if let Some(filtered) = sanitizer.push(&text) {
                    if tx.send(StreamEvent::Text(filtered)).await.is_err() {
                        break;
                    }
                }
            }
            terminal => {
                if let Some(filtered) = sanitizer.flush() {
                    if tx.send(StreamEvent::Text(filtered)).await.is_err() {
                        break;
                    }
                }
                let _ = tx.send(terminal).await;
                break;
            }
        }
    }

    drop(guard);
    sandboxes.destroy(sandbox);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockAgent;
    use crate::prompt::ENFORCEMENT_MARKER;
    use crate::sanitize::NEUTRAL_WORKSPACE_PHRASE;

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::user(content)],
            model: None,
            force_format: false,
        }
    }

    fn orchestrator(agent: MockAgent, root: &std::path::Path) -> Orchestrator {
        Orchestrator::new(Arc::new(agent), &Config::default())
            .unwrap()
            .with_sandbox_manager(SandboxManager::with_root(root))
    }

    #[tokio::test]
    async fn test_prompt_reaches_agent_with_directives() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(MockAgent::echoing(), root.path());

        let output = orch.complete(request("List files here")).await.unwrap();
        assert!(output.starts_with("System: You are running in a secure sandbox"));
        assert!(output.contains("User: List files here"));
    }

    #[tokio::test]
    async fn test_force_format_adds_enforcement() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(MockAgent::echoing(), root.path());

        let mut req = request("hello");
        req.force_format = true;
        let output = orch.complete(req).await.unwrap();
        assert!(output.contains(ENFORCEMENT_MARKER));
    }

    #[tokio::test]
    async fn test_plain_request_has_no_enforcement() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(MockAgent::echoing(), root.path());

        let output = orch
            .complete(request("What is the capital of France?"))
            .await
            .unwrap();
        assert!(!output.contains(ENFORCEMENT_MARKER));
    }

    #[tokio::test]
    async fn test_output_paths_are_sanitized() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            MockAgent::replying("Saved to /tmp/ferry_sandbox_ab12/x.png today.\n"),
            root.path(),
        );

        let output = orch.complete(request("save a file")).await.unwrap();
        assert!(output.contains(NEUTRAL_WORKSPACE_PHRASE));
        assert!(!output.contains("ferry_sandbox_ab12"));
    }

    #[tokio::test]
    async fn test_sandbox_removed_after_completion() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(MockAgent::replying("done.\n"), root.path());

        orch.complete(request("hi")).await.unwrap();

        // The relay task destroys the sandbox just after the terminal event.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let leftovers: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "sandbox must be cleaned up");
    }

    #[tokio::test]
    async fn test_agent_failure_surfaces_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(MockAgent::failing(2, "quota exceeded"), root.path());

        let err = orch.complete(request("hi")).await.unwrap_err();
        assert!(err.is_process_exit());
        assert!(err.to_string().contains("quota exceeded"));

        // Cleanup still ran.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let leftovers: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_stream_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(MockAgent::echoing(), root.path());

        let rx = orch.stream_completion(request("hello")).unwrap();
        drop(rx);

        // Give the relay and runner tasks time to unwind.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let leftovers: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "sandbox must be cleaned up on abandon");
    }
}
