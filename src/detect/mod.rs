//! Format-requirement detection.
//!
//! Decides whether the agent's reply must be wrapped in XML-style
//! formatting tags. Two interchangeable strategies: a deterministic rule
//! cascade (`cascade`) and a weighted confidence accumulator
//! (`confidence`). Both are pure functions of the message history —
//! deterministic, idempotent, no external calls.

mod cascade;
mod confidence;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::messages::ChatMessage;

pub(crate) use confidence::DEFAULT_CONFIDENCE_THRESHOLD;

/// Outcome of a detection pass.
#[derive(Debug, Clone)]
pub(crate) struct Detection {
    /// Whether XML-style response formatting is required.
    pub required: bool,
    /// How the verdict was reached.
    pub strength: Strength,
    /// Ordered descriptions of the matched patterns.
    pub evidence: Vec<String>,
}

impl Detection {
    /// A negative verdict with a named reason and no evidence.
    pub fn not_required(reason: &'static str) -> Self {
        Self {
            required: false,
            strength: Strength::Rule(reason),
            evidence: Vec::new(),
        }
    }

    /// A verdict forced by the caller's explicit override flag.
    pub fn forced() -> Self {
        Self {
            required: true,
            strength: Strength::Rule("explicit format override"),
            evidence: Vec::new(),
        }
    }
}

/// Verdict strength: the matched rule name for the cascade, or the
/// accumulated score for the confidence strategy.
#[derive(Debug, Clone)]
pub(crate) enum Strength {
    Rule(&'static str),
    Score(f64),
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rule(name) => write!(f, "{name}"),
            Self::Score(score) => write!(f, "confidence {score:.1}"),
        }
    }
}

/// Selectable detection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum DetectorStrategy {
    /// Ordered rule cascade, first match wins.
    #[default]
    Cascade,
    /// Weighted scoring against a threshold.
    Confidence,
}

impl std::fmt::Display for DetectorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cascade => write!(f, "cascade"),
            Self::Confidence => write!(f, "confidence"),
        }
    }
}

impl std::str::FromStr for DetectorStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cascade" => Ok(Self::Cascade),
            "confidence" => Ok(Self::Confidence),
            _ => anyhow::bail!(
                "Unknown detection strategy: '{s}'. Supported: cascade, confidence"
            ),
        }
    }
}

/// Runs the configured strategy over the message history.
pub(crate) fn detect(
    strategy: DetectorStrategy,
    messages: &[ChatMessage],
    confidence_threshold: f64,
) -> Detection {
    match strategy {
        DetectorStrategy::Cascade => cascade::detect(messages),
        DetectorStrategy::Confidence => confidence::detect(messages, confidence_threshold),
    }
}

/// Tag names that belong to conversation scaffolding or HTML markup.
/// These must never be treated as response-formatting tools.
pub(super) const STRUCTURAL_TAGS: &[&str] = &[
    "environment_details",
    "task",
    "tool_name",
    "thinking",
    "system",
    "response",
    "result",
    "question",
    "html",
    "head",
    "body",
    "title",
    "div",
    "span",
    "p",
    "br",
    "a",
    "ul",
    "ol",
    "li",
    "table",
    "script",
    "style",
];

pub(super) fn is_structural_tag(name: &str) -> bool {
    STRUCTURAL_TAGS.contains(&name.to_lowercase().as_str())
}

static OPEN_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([A-Za-z]\w*)>").expect("valid regex"));

/// A well-formed `<name>…</name>` block.
#[derive(Debug)]
pub(super) struct TagBlock<'a> {
    pub name: String,
    pub inner: &'a str,
}

/// Scans for well-formed opening/closing tag pairs.
///
/// The `regex` crate has no backreferences, so pairing is done by hand:
/// for each opening tag, the nearest matching close tag after it is taken.
pub(super) fn tag_blocks(text: &str) -> Vec<TagBlock<'_>> {
    let mut blocks = Vec::new();

    for caps in OPEN_TAG.captures_iter(text) {
        let name = &caps[1];
        let open_end = caps.get(0).expect("whole match").end();
        let close = format!("</{name}>");

        if let Some(rel) = text[open_end..].find(&close) {
            blocks.push(TagBlock {
                name: name.to_lowercase(),
                inner: &text[open_end..open_end + rel],
            });
        }
    }

    blocks
}

static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^`]*```").expect("valid regex"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").expect("valid regex"));

/// Removes fenced and inline code so example snippets are not counted as
/// format signal.
pub(super) fn strip_code(text: &str) -> String {
    let without_fences = FENCED_CODE.replace_all(text, "");
    INLINE_CODE.replace_all(&without_fences, "").into_owned()
}

/// All distinct opening tag names, lowercased, in order of appearance.
pub(super) fn open_tag_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for caps in OPEN_TAG.captures_iter(text) {
        let name = caps[1].to_lowercase();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_display() {
        assert_eq!(format!("{}", DetectorStrategy::Cascade), "cascade");
        assert_eq!(format!("{}", DetectorStrategy::Confidence), "confidence");
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "cascade".parse::<DetectorStrategy>().unwrap(),
            DetectorStrategy::Cascade
        );
        assert_eq!(
            "Confidence".parse::<DetectorStrategy>().unwrap(),
            DetectorStrategy::Confidence
        );
        assert!("bayesian".parse::<DetectorStrategy>().is_err());
    }

    #[test]
    fn test_tag_blocks_finds_matched_pairs() {
        let text = "<attempt_completion>done</attempt_completion> and <task>x</task>";
        let blocks = tag_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "attempt_completion");
        assert_eq!(blocks[0].inner, "done");
        assert_eq!(blocks[1].name, "task");
    }

    #[test]
    fn test_tag_blocks_ignores_unclosed_tags() {
        let blocks = tag_blocks("<orphan> no closing tag here");
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_open_tag_names_deduplicates() {
        let names = open_tag_names("<Foo>a</Foo> <foo>b</foo> <bar>");
        assert_eq!(names, vec!["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn test_structural_tag_check_is_case_insensitive() {
        assert!(is_structural_tag("environment_details"));
        assert!(is_structural_tag("TASK"));
        assert!(!is_structural_tag("attempt_completion"));
    }

    #[test]
    fn test_detection_is_deterministic() {
        use crate::messages::ChatMessage;
        let messages = vec![ChatMessage::system(
            "Tool uses are formatted using XML-style tags",
        )];
        let a = detect(DetectorStrategy::Cascade, &messages, 5.0);
        let b = detect(DetectorStrategy::Cascade, &messages, 5.0);
        assert_eq!(a.required, b.required);
        assert_eq!(a.evidence, b.evidence);
    }
}
