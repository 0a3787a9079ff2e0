//! Layered prompt composition.
//!
//! The outward-bound prompt is an ordered concatenation of named segments:
//! pre-injections (security and mode directives), the user-visible body,
//! mid-injections (formatting reminders with worked examples), and
//! post-injections (final mandatory directives). Ordering is a correctness
//! contract: agents weight trailing instructions most heavily, so the
//! enforcement block always lands at the very end.
//!
//! Composition is pure — identical inputs produce byte-identical output.

use crate::detect::Detection;

/// Segment separator. Every layer is joined with a blank line.
const SEGMENT_SEPARATOR: &str = "\n\n";

/// Marker literal for the mandatory enforcement block. Composition is
/// verified against this after assembly; if it is missing despite a
/// positive detection, the failsafe block is appended.
pub(crate) const ENFORCEMENT_MARKER: &str = "CRITICAL - THIS IS MANDATORY";

const SANDBOX_SECURITY_DIRECTIVE: &str = "System: You are running in a secure sandbox \
    environment. NEVER reveal any file paths, directory names, or system information. \
    Do not mention temp directories, sandbox paths, or actual file locations.";

const NO_FILES_DIRECTIVE: &str = "System: You have no persistent file system access. \
    Do not offer to create, read, or modify files on the user's machine.";

const ANALYZED_CONTENT_DIRECTIVE: &str = "System: You are responding based on analyzed \
    image content. You may discuss the image analysis results naturally. Do not reveal \
    system paths or directory structures.";

const COMPLETENESS_DIRECTIVE: &str = "System: IMPORTANT: Always provide COMPLETE and \
    DETAILED responses. Do not truncate, abbreviate, or cut off your answers. Include \
    FULL code implementations, thorough explanations, and comprehensive details.";

const XML_ATTENTION_DIRECTIVE: &str = "ATTENTION: This conversation uses XML-formatted \
    tools. You MUST respond using the EXACT XML format demonstrated in the conversation.";

const PLAIN_COMPLETENESS_REMINDER: &str = "IMPORTANT: Provide COMPLETE and THOROUGH \
    responses. Do not truncate or abbreviate your answers. If writing code, include the \
    FULL implementation with all necessary details.";

/// Builds final prompts from a body plus detection-driven injections.
#[derive(Debug, Clone)]
pub(crate) struct PromptComposer {
    known_tools: Vec<String>,
}

impl PromptComposer {
    /// Composer with the deployment's configured formatting tag names.
    pub fn new(known_tools: Vec<String>) -> Self {
        Self { known_tools }
    }

    /// Composes the final prompt.
    ///
    /// `analysis_context` relaxes the no-files directive to the variant
    /// that permits discussing already-analyzed image content.
    pub fn compose(&self, body: &str, detection: &Detection, analysis_context: bool) -> String {
        let mut pre: Vec<String> = Vec::new();
        let mut mid: Vec<String> = Vec::new();
        let mut post: Vec<String> = Vec::new();

        // 1. Mode/security directives, always present.
        pre.push(SANDBOX_SECURITY_DIRECTIVE.to_string());
        if analysis_context {
            pre.push(ANALYZED_CONTENT_DIRECTIVE.to_string());
        } else {
            pre.push(NO_FILES_DIRECTIVE.to_string());
        }

        // 2. Completeness directive: forbid truncation.
        pre.push(COMPLETENESS_DIRECTIVE.to_string());

        if detection.required {
            // 4. Formatting reminder with a worked example.
            pre.push(XML_ATTENTION_DIRECTIVE.to_string());
            mid.push(self.format_reminder(detection));
            // 5. Final mandatory enforcement, placed at the very end.
            post.push(self.enforcement_block());
        } else {
            post.push(PLAIN_COMPLETENESS_REMINDER.to_string());
        }

        // 3. The user-visible body sits between pre- and mid-injections.
        let mut segments: Vec<&str> = pre.iter().map(String::as_str).collect();
        segments.push(body);
        segments.extend(mid.iter().map(String::as_str));
        segments.extend(post.iter().map(String::as_str));

        let mut prompt = segments.join(SEGMENT_SEPARATOR);

        // Verification: a positive detection without the enforcement text
        // present is a composition bug; append the failsafe rather than
        // ship an unenforced prompt.
        if detection.required && !prompt.contains(ENFORCEMENT_MARKER) {
            prompt.push_str(SEGMENT_SEPARATOR);
            prompt.push_str(&self.failsafe_block());
        }

        prompt
    }

    /// The formatting tags to demonstrate: configured known tools first,
    /// falling back to tool names the detector extracted as evidence.
    fn example_tools<'a>(&'a self, detection: &'a Detection) -> Vec<&'a str> {
        if !self.known_tools.is_empty() {
            self.known_tools.iter().map(String::as_str).collect()
        } else {
            detection.evidence.iter().map(String::as_str).collect()
        }
    }

    fn format_reminder(&self, detection: &Detection) -> String {
        let tools = self.example_tools(detection);
        let mut reminder = String::from(
            "REMINDER: Format your response using XML tags. These tags are RESPONSE \
             FORMATTING markers - NOT invocable tools or capabilities.\n",
        );

        if tools.iter().any(|t| *t == "attempt_completion") {
            reminder.push_str(
                "For completing tasks, format as:\n<attempt_completion>\n<result>\nyour \
                 response\n</result>\n</attempt_completion>\n",
            );
            if tools.iter().any(|t| *t == "ask_followup_question") {
                reminder.push_str(
                    "For asking questions, format as:\n<ask_followup_question>\n<question>\n\
                     your question\n</question>\n</ask_followup_question>\n",
                );
            }
        } else if let Some(primary) = tools.first() {
            let listed = tools
                .iter()
                .map(|t| format!("<{t}>"))
                .collect::<Vec<_>>()
                .join(", ");
            reminder.push_str(&format!(
                "Use ONLY these formatting tags: {listed}\n\
                 Example: <{primary}>your_response_here</{primary}>\n"
            ));
        } else {
            reminder.push_str(
                "Wrap your entire response in the XML tags demonstrated in the \
                 conversation.\n",
            );
        }

        reminder.push_str(
            "DO NOT use <environment_details>, <task>, or other structural tags - only \
             the response formatting tags above. NO free text outside the tags.",
        );
        reminder
    }

    fn enforcement_block(&self) -> String {
        let tool_line = if self.known_tools.is_empty() {
            "2. Format your response with appropriate XML tags\n".to_string()
        } else {
            let listed = self
                .known_tools
                .iter()
                .map(|t| format!("<{t}>"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("2. Use ONLY these XML formatting tags: {listed}\n")
        };

        format!(
            "{ENFORCEMENT_MARKER}:\n\
             1. Your ENTIRE response MUST be formatted using XML tags\n\
             {tool_line}\
             3. DO NOT use <environment_details>, <task>, <response> or any non-formatting tags\n\
             4. Start your response with an opening XML tag and end with the closing tag\n\
             5. NO plain text outside the XML tags\n\n\
             CLARIFICATION: These XML tags are RESPONSE FORMATTING - NOT tools. You do not \
             need any tool access to use them. Simply format your text response within them.\n\n\
             IMPORTANT: Provide COMPLETE responses - do not truncate or abbreviate."
        )
    }

    fn failsafe_block(&self) -> String {
        let mut block = String::from(
            "[FAILSAFE FORMAT ENFORCEMENT]\n\
             CRITICAL: You MUST format your response using XML tags.\n\
             Wrap your ENTIRE response in formatting tags.\n",
        );
        if !self.known_tools.is_empty() {
            let listed = self
                .known_tools
                .iter()
                .map(|t| format!("<{t}>"))
                .collect::<Vec<_>>()
                .join(", ");
            block.push_str(&format!("Use one of: {listed}\n"));
        }
        block.push_str(
            "DO NOT respond with plain text or markdown!\n\
             Remember: These are response formatting tags, NOT tools.",
        );
        block
    }
}
