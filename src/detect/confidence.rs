//! Weighted confidence-accumulator detector.
//!
//! The alternate strategy for nuanced conversations: code is stripped
//! first so examples do not count as signal, a conversation that is mostly
//! fenced code short-circuits to "not required", and the remaining text is
//! scored against weighted pattern tables. The verdict compares the sum
//! to a configurable threshold.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::messages::{ChatMessage, Role};

use super::{strip_code, tag_blocks, Detection, Strength};

/// Default score needed to require XML formatting.
pub(crate) const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 5.0;

/// Cap on how often a single low-weight pattern may count.
const LOW_WEIGHT_CAP: usize = 3;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^`]*```").expect("valid regex"));

static HIGH_PATTERNS: Lazy<Vec<(Regex, f64, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)you must use tools to respond").expect("valid regex"),
            3.0,
            "Mandatory tool usage directive",
        ),
        (
            Regex::new(r"(?i)tool uses are formatted using xml-style tags").expect("valid regex"),
            3.0,
            "XML format specification",
        ),
        (
            Regex::new(r"(?i)respond using (?:the )?<\w+> tool").expect("valid regex"),
            3.0,
            "Specific tool response format",
        ),
    ]
});

static MEDIUM_PATTERNS: Lazy<Vec<(Regex, f64, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"<attempt_completion>").expect("valid regex"),
            2.0,
            "attempt_completion tag",
        ),
        (
            Regex::new(r"<ask_followup_question>").expect("valid regex"),
            2.0,
            "ask_followup_question tag",
        ),
        (
            Regex::new(r"(?i)use this tool to").expect("valid regex"),
            2.0,
            "Tool usage instructions",
        ),
        (
            Regex::new(r"(?i)available tools?:").expect("valid regex"),
            2.0,
            "Tool list header",
        ),
    ]
});

static LOW_PATTERNS: Lazy<Vec<(Regex, f64, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"<\w+_\w+>").expect("valid regex"),
            1.0,
            "Compound XML tags",
        ),
        (
            Regex::new(r"(?i)\btool\b").expect("valid regex"),
            1.0,
            "Tool mentions",
        ),
        (
            Regex::new(r"(?i)\bxml\b").expect("valid regex"),
            1.0,
            "XML mentions",
        ),
    ]
});

static NEGATIVE_PATTERNS: Lazy<Vec<(Regex, f64, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)how to use xml").expect("valid regex"),
            -3.0,
            "Discussion about XML",
        ),
        (
            Regex::new(r"(?i)\.xml\b").expect("valid regex"),
            -2.0,
            "XML file extension",
        ),
        (
            Regex::new(r"(?i)\.html\b").expect("valid regex"),
            -2.0,
            "HTML file extension",
        ),
        (
            Regex::new(r"(?i)example of xml").expect("valid regex"),
            -2.0,
            "XML example discussion",
        ),
    ]
});

static TOOL_DESCRIPTION_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:use this tool|this tool|used for|description:)").expect("valid regex")
});

const PARAMETER_TAGS: &[&str] = &["parameter", "param", "arg", "argument"];

/// Runs the confidence strategy against the threshold.
pub(super) fn detect(messages: &[ChatMessage], threshold: f64) -> Detection {
    if is_primarily_code_discussion(messages) {
        debug!("Confidence detection skipped: primarily code discussion");
        return Detection {
            required: false,
            strength: Strength::Score(0.0),
            evidence: vec!["primarily code discussion".to_string()],
        };
    }

    let (score, evidence) = calculate(messages);
    let required = score >= threshold;
    debug!("Confidence detection: {score:.1}/{threshold:.1} -> required={required}");

    Detection {
        required,
        strength: Strength::Score(score),
        evidence,
    }
}

/// True when any message is dominated by fenced code: more than one fence
/// and over half of its lines inside fences.
fn is_primarily_code_discussion(messages: &[ChatMessage]) -> bool {
    for msg in messages {
        let fence_markers = msg.content.matches("```").count();
        if fence_markers > 2 {
            let total_lines = msg.content.lines().count().max(1);
            let code_lines: usize = FENCED_BLOCK
                .find_iter(&msg.content)
                .map(|m| m.as_str().matches('\n').count())
                .sum();
            if code_lines * 2 > total_lines {
                return true;
            }
        }
    }
    false
}

/// Accumulates the weighted score and the matched-pattern descriptions.
fn calculate(messages: &[ChatMessage]) -> (f64, Vec<String>) {
    let mut combined = String::new();
    let mut system = String::new();

    for msg in messages {
        combined.push(' ');
        combined.push_str(&msg.content);
        if msg.role == Role::System {
            system.push(' ');
            system.push_str(&msg.content);
        }
    }

    let clean = strip_code(&combined);
    let clean_system = strip_code(&system);

    let mut score = 0.0;
    let mut evidence = Vec::new();

    for (points, description) in phrasal_hits(&clean) {
        score += points;
        evidence.push(description.to_string());
    }

    for (regex, points, description) in LOW_PATTERNS.iter() {
        let count = regex.find_iter(&clean).count();
        if count > 0 {
            score += points * count.min(LOW_WEIGHT_CAP) as f64;
            evidence.push(format!("{description} ({count}x)"));
        }
    }

    let structure = tool_definition_structure_score(&clean);
    if structure > 0.0 {
        score += structure;
        evidence.push(format!("Tool definition structure ({structure:.1} points)"));
    }

    for (regex, points, description) in NEGATIVE_PATTERNS.iter() {
        if regex.is_match(&clean) {
            score += points; // points are negative
            evidence.push(format!("NEGATIVE: {description}"));
        }
    }

    // System-authored triggers weigh extra: a 50% bonus per repeated hit.
    if !clean_system.trim().is_empty() {
        let bonus: f64 = phrasal_hits(&clean_system)
            .iter()
            .map(|(points, _)| points * 0.5)
            .sum();
        if bonus > 0.0 {
            score += bonus;
            evidence.push(format!("System message bonus (+{bonus:.1})"));
        }
    }

    (score, evidence)
}

/// High- and medium-weight phrasal hits in one pass; shared between the
/// main score and the system-message bonus.
fn phrasal_hits(text: &str) -> Vec<(f64, &'static str)> {
    let mut hits = Vec::new();

    for (regex, points, description) in HIGH_PATTERNS.iter().chain(MEDIUM_PATTERNS.iter()) {
        if regex.is_match(text) {
            hits.push((*points, *description));
        }
    }
    if tag_blocks(text).iter().any(|b| b.name == "tool_name") {
        hits.push((3.0, "Tool name definitions"));
    }

    hits
}

/// Structural bonus for well-formed tool-definition blocks: an open/close
/// pair whose body reads like a description (+2.0), plus parameter
/// declarations (+1.0 each).
fn tool_definition_structure_score(clean: &str) -> f64 {
    let mut score = 0.0;

    for block in tag_blocks(clean) {
        if PARAMETER_TAGS.contains(&block.name.as_str()) {
            score += 1.0;
        } else if TOOL_DESCRIPTION_OPENER.is_match(block.inner) {
            score += 2.0;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChatMessage;

    fn score_of(content: &str) -> f64 {
        let (score, _) = calculate(&[ChatMessage::user(content)]);
        score
    }

    #[test]
    fn test_high_weight_trigger_scores_three() {
        let score = score_of("Tool uses are formatted using XML-style tags");
        assert!(score >= 3.0, "score was {score}");
    }

    #[test]
    fn test_code_dominated_conversation_short_circuits() {
        let mut content = String::from("tool tool tool XML XML\n");
        content.push_str("```\n");
        content.push_str(&"let x = 1;\n".repeat(30));
        content.push_str("```\nmiddle\n```\n");
        content.push_str(&"let y = 2;\n".repeat(30));
        content.push_str("```\n");

        let result = detect(&[ChatMessage::user(&content)], DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(!result.required);
        assert_eq!(result.evidence, vec!["primarily code discussion".to_string()]);
    }

    #[test]
    fn test_threshold_decides_verdict() {
        let messages = vec![ChatMessage::user(
            "You must use tools to respond. Available tools: <attempt_completion>",
        )];
        // 3.0 high + 2.0 header + 2.0 tag + low mentions
        let high = detect(&messages, 5.0);
        assert!(high.required);

        let strict = detect(&messages, 50.0);
        assert!(!strict.required);
    }

    #[test]
    fn test_low_weight_mentions_are_capped() {
        let many = "tool ".repeat(20);
        let few = "tool tool tool";
        let diff = (score_of(&many) - score_of(few)).abs();
        assert!(diff < f64::EPSILON, "cap at {LOW_WEIGHT_CAP} occurrences");
    }

    #[test]
    fn test_meta_discussion_scores_negative() {
        let score = score_of("Can you explain how to use XML in a config.xml file?");
        assert!(score < 0.0, "score was {score}");
    }

    #[test]
    fn test_tool_definition_structure_bonus() {
        let text = "<read_file>Use this tool to read a file from disk</read_file>\n\
                    <parameter>path</parameter>";
        assert!((tool_definition_structure_score(text) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_system_message_bonus_applies() {
        let plain = vec![ChatMessage::user("You must use tools to respond")];
        let system = vec![ChatMessage::system("You must use tools to respond")];

        let (plain_score, _) = calculate(&plain);
        let (system_score, evidence) = calculate(&system);

        assert!(system_score > plain_score);
        assert!(evidence.iter().any(|e| e.contains("System message bonus")));
    }

    #[test]
    fn test_code_blocks_do_not_count_as_signal() {
        let fenced =
            "Here is an example:\n```\n<tool_name>read_file</tool_name>\n```\nthanks";
        let (score, _) = calculate(&[ChatMessage::user(fenced)]);
        assert!(score < 3.0, "fenced tool_name must not score high, got {score}");
    }

    #[test]
    fn test_detect_is_idempotent() {
        let messages = vec![ChatMessage::user("Available tools: <attempt_completion>")];
        let a = detect(&messages, DEFAULT_CONFIDENCE_THRESHOLD);
        let b = detect(&messages, DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(a.required, b.required);
        assert_eq!(a.evidence, b.evidence);
    }
}
