//! `ferry detect` - print the format-requirement verdict for a conversation.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::detect::{detect, DetectorStrategy};

use super::load_messages;

pub async fn run(
    input: Option<PathBuf>,
    prompt: Option<String>,
    strategy: Option<String>,
) -> Result<()> {
    let config = Config::load(Path::new("."))?;
    let strategy: DetectorStrategy = match strategy {
        Some(s) => s.parse()?,
        None => config.detection.get_strategy()?,
    };

    let messages = load_messages(input.as_ref(), prompt.as_deref())?;
    let detection = detect(strategy, &messages, config.detection.confidence_threshold);

    println!("strategy: {strategy}");
    println!("required: {}", detection.required);
    println!("verdict:  {}", detection.strength);
    if !detection.evidence.is_empty() {
        println!("evidence:");
        for item in &detection.evidence {
            println!("  - {item}");
        }
    }

    Ok(())
}
