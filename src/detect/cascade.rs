//! Deterministic rule-cascade detector.
//!
//! Rules are held in an explicit ordered list with tagged kinds
//! (exclusion, primary, secondary) so priority and short-circuit behavior
//! are auditable rule by rule. Evaluation is fixed-order, first match
//! wins; the default verdict is "not required".

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::messages::{combined_text, ChatMessage, Role};

use super::{is_structural_tag, open_tag_names, strip_code, tag_blocks, Detection, Strength};

// --- Exclusion signals -------------------------------------------------------

static PLAIN_FORMAT_INSTRUCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\brespond (?:only )?(?:in|with|using) (?:plain text|json|markdown)\b")
        .expect("valid regex")
});

static JSON_OUTPUT_INSTRUCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:format|provide|return) (?:your |the )?(?:response|answer|output) (?:in|as) json\b")
        .expect("valid regex")
});

static NO_XML_INSTRUCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdo not (?:use|respond with) xml\b").expect("valid regex"));

static HTML_BOILERPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<!doctype html>|<html[\s>]").expect("valid regex"));

/// Wrapper tags emitted by agent frontends around the conversation itself.
/// Their presence means the caller genuinely speaks the tag protocol, so
/// exclusion signals must not fire.
static SYSTEM_WRAPPER_TAGS: &[&str] = &["environment_details", "task"];

// --- Primary triggers --------------------------------------------------------

static XML_FORMAT_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)tool uses are formatted using xml-style tags").expect("valid regex")
});

static MANDATORY_TOOL_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)you must use tools to respond").expect("valid regex"));

static RESPOND_USING_TOOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)respond using (?:the )?<(\w+)> tool").expect("valid regex")
});

// --- Secondary triggers ------------------------------------------------------

static INSTRUCTIONAL_LANGUAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:must|format|your response)\b").expect("valid regex")
});

static COMPOUND_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(\w+_\w+)>").expect("valid regex"));

static CONTINUATION_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:continue|retry|try again|once more|keep going)\b").expect("valid regex")
});

static USE_THE_TOOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\buse the (\w+) tool\b").expect("valid regex"));

/// Runs the cascade over the message history.
pub(super) fn detect(messages: &[ChatMessage]) -> Detection {
    let text = combined_text(messages);
    let clean = strip_code(&text);

    // 1. Exclusion: explicitly non-XML conversations bail out immediately,
    //    unless a system wrapper tag shows the caller speaks the protocol.
    if !has_system_wrapper_tag(&text) {
        if let Some(signal) = exclusion_signal(&text, &clean) {
            debug!("Cascade exclusion fired: {signal}");
            return Detection {
                required: false,
                strength: Strength::Rule(signal),
                evidence: vec![signal.to_string()],
            };
        }
    }

    // 2. Primary triggers: strong phrasal patterns.
    if let Some(rule) = primary_trigger(&clean) {
        return Detection {
            required: true,
            strength: Strength::Rule(rule),
            evidence: extract_tool_names(&clean),
        };
    }

    // 3. Secondary, contextual triggers.
    if let Some(rule) = secondary_trigger(messages, &clean) {
        return Detection {
            required: true,
            strength: Strength::Rule(rule),
            evidence: extract_tool_names(&clean),
        };
    }

    Detection::not_required("no trigger matched")
}

fn has_system_wrapper_tag(text: &str) -> bool {
    SYSTEM_WRAPPER_TAGS
        .iter()
        .any(|t| text.contains(&format!("<{t}>")))
}

fn exclusion_signal(raw: &str, clean: &str) -> Option<&'static str> {
    if PLAIN_FORMAT_INSTRUCTION.is_match(clean) || JSON_OUTPUT_INSTRUCTION.is_match(clean) {
        return Some("exclusion: explicit plain-text/JSON instruction");
    }
    if NO_XML_INSTRUCTION.is_match(clean) {
        return Some("exclusion: explicit no-XML instruction");
    }
    if HTML_BOILERPLATE.is_match(clean) {
        return Some("exclusion: HTML document boilerplate");
    }
    // Tags that only ever appear inside code fences are example code.
    if !open_tag_names(raw).is_empty() && open_tag_names(clean).is_empty() {
        return Some("exclusion: XML confined to code blocks");
    }
    None
}

fn primary_trigger(clean: &str) -> Option<&'static str> {
    if XML_FORMAT_SPEC.is_match(clean) {
        return Some("primary: XML format specification");
    }
    if MANDATORY_TOOL_USE.is_match(clean) {
        return Some("primary: mandatory tool usage directive");
    }
    if RESPOND_USING_TOOL.is_match(clean) {
        return Some("primary: specific tool response format");
    }
    if tag_blocks(clean).iter().any(|b| b.name == "tool_name") {
        return Some("primary: tool_name declaration");
    }
    None
}

fn secondary_trigger(messages: &[ChatMessage], clean: &str) -> Option<&'static str> {
    let instructional = INSTRUCTIONAL_LANGUAGE.is_match(clean);

    if instructional {
        let action_tags: Vec<String> = COMPOUND_TAG
            .captures_iter(clean)
            .map(|c| c[1].to_lowercase())
            .filter(|name| !is_structural_tag(name))
            .collect();
        if !action_tags.is_empty() {
            return Some("secondary: action tags under instructional language");
        }

        let distinct: Vec<String> = open_tag_names(clean)
            .into_iter()
            .filter(|name| !is_structural_tag(name))
            .collect();
        if distinct.len() >= 2 {
            return Some("secondary: multiple non-structural tags under instructional language");
        }
    }

    // Prior-turn tool use plus a "continue/retry" follow-up means the
    // caller still expects the tag protocol.
    let prior_tool_use = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .any(|m| {
            tag_blocks(&m.content)
                .iter()
                .any(|b| !is_structural_tag(&b.name))
        });
    let continuation = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .is_some_and(|m| CONTINUATION_PHRASE.is_match(&m.content));

    if prior_tool_use && continuation {
        return Some("secondary: prior XML tool use with continuation request");
    }

    None
}

/// Extracts tool names from well-formed declarative patterns only, filtered
/// against the structural deny-list.
fn extract_tool_names(clean: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String| {
        let name = name.to_lowercase();
        if !name.is_empty() && !is_structural_tag(&name) && !names.contains(&name) {
            names.push(name);
        }
    };

    for block in tag_blocks(clean) {
        if block.name == "tool_name" {
            push(block.inner.trim().to_string());
        }
    }
    for caps in RESPOND_USING_TOOL.captures_iter(clean) {
        push(caps[1].to_string());
    }
    for caps in USE_THE_TOOL.captures_iter(clean) {
        push(caps[1].to_string());
    }
    for caps in COMPOUND_TAG.captures_iter(clean) {
        push(caps[1].to_string());
    }

    names
}
