//! CLI subcommand implementations.

pub mod check;
pub mod detect;
pub mod run;

use anyhow::{Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::messages::ChatMessage;

/// Loads the conversation for `run`/`detect`: either a plain prompt given
/// on the command line, or a JSON array of role-tagged messages from a
/// file (`-` for stdin).
pub(crate) fn load_messages(
    input: Option<&PathBuf>,
    prompt: Option<&str>,
) -> Result<Vec<ChatMessage>> {
    if let Some(prompt) = prompt {
        return Ok(vec![ChatMessage::user(prompt)]);
    }

    let raw = match input {
        Some(path) if path == Path::new("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read messages from stdin")?;
            buf
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read messages file: {}", path.display()))?,
        None => anyhow::bail!("Provide either a prompt or a messages file (use '-' for stdin)"),
    };

    let messages: Vec<ChatMessage> =
        serde_json::from_str(&raw).context("Messages must be a JSON array of {role, content}")?;

    if messages.is_empty() {
        anyhow::bail!("Messages array is empty");
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    #[test]
    fn test_plain_prompt_becomes_user_message() {
        let messages = load_messages(None, Some("hello")).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
    }

    #[test]
    fn test_messages_file_parses_roles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(
            &path,
            r#"[{"role":"system","content":"be brief"},{"role":"user","content":"hi"}]"#,
        )
        .unwrap();

        let messages = load_messages(Some(&path), None).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn test_empty_array_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(load_messages(Some(&path), None).is_err());
    }

    #[test]
    fn test_missing_input_is_an_error() {
        assert!(load_messages(None, None).is_err());
    }
}
