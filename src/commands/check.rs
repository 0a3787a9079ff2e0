//! `ferry check` - verify the configured agent binary responds.

use anyhow::{Context, Result};
use std::path::Path;

use crate::agent::make_agent;
use crate::config::Config;

pub async fn run(provider: Option<String>) -> Result<()> {
    let config = Config::load(Path::new("."))?;
    let provider = match provider {
        Some(p) => p.parse()?,
        None => config.agent.get_provider()?,
    };

    let agent = make_agent(provider, &config);
    let version = agent
        .verify()
        .await
        .with_context(|| format!("{} agent is not responding", agent.name()))?;

    println!("{}: ok ({version})", agent.name());
    Ok(())
}
