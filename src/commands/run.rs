//! `ferry run` - stream one completion to stdout.
//!
//! With `--image`, the files are analyzed first in an isolated sub-call
//! and the analysis text is spliced into the conversation according to
//! the agent's injection policy.

use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent::make_agent;
use crate::analysis::{inject_analysis, ImageAnalyzer};
use crate::config::Config;
use crate::messages::{ChatMessage, Role};
use crate::orchestrator::{CompletionRequest, Orchestrator};
use crate::runner::StreamEvent;

use super::load_messages;

pub async fn run(
    input: Option<PathBuf>,
    prompt: Option<String>,
    model: Option<String>,
    force_format: bool,
    images: Vec<PathBuf>,
) -> Result<()> {
    let config = Config::load(Path::new("."))?;
    let provider = config.agent.get_provider()?;
    let agent = make_agent(provider, &config);

    let mut messages = load_messages(input.as_ref(), prompt.as_deref())?;

    if !images.is_empty() {
        let analyzer = ImageAnalyzer::new(agent.clone(), &config);
        let context = last_user_text(&messages);
        let analysis = analyzer.analyze(&images, context.as_deref()).await?;
        messages = inject_analysis(&messages, &analysis, agent.analysis_injection());
    }

    let orchestrator = Orchestrator::new(agent, &config)?;
    let request = CompletionRequest {
        messages,
        model,
        force_format,
    };

    let mut rx = orchestrator.stream_completion(request)?;
    let mut stdout = std::io::stdout().lock();

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Text(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            StreamEvent::Completed => {
                writeln!(stdout)?;
                return Ok(());
            }
            StreamEvent::Failed(err) => return Err(err.into()),
        }
    }

    anyhow::bail!("completion stream ended without a terminal event")
}

fn last_user_text(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
}
