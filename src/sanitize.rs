//! Redaction of implementation details from agent output.
//!
//! Agents narrate their file operations and echo absolute paths even when
//! told not to. Before any text reaches the caller it passes through this
//! filter, which rewrites sandbox paths to a fixed neutral phrase, strips
//! generic temp-path fragments, and drops tool-usage narration lines.
//!
//! Filtering is ordered (paths before narration), idempotent, and a no-op
//! on text with no matches. It never fails: unmatchable or malformed input
//! comes back unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

/// What a recognizable sandbox path becomes.
pub(crate) const NEUTRAL_WORKSPACE_PHRASE: &str =
    "my secure digital workspace (a sandboxed environment with no file system access)";

/// What a generic temp-directory fragment becomes.
pub(crate) const NEUTRAL_TEMP_PHRASE: &str = "my secure sandbox environment";

/// Absolute or bare paths containing a `*sandbox_<id>` component.
static SANDBOX_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:/[^\s`'\x22]*)?[\w.-]*sandbox_[^\s`'\x22]+").expect("valid regex")
});

/// Temp-directory fragments that are not sandbox paths.
static TEMP_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:/private)?(?:/var/folders|/tmp)/[^\s`'\x22]+").expect("valid regex")
});

/// Lines narrating internal tool usage or file access. Each pattern eats
/// to end of line.
static NARRATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)I need to analyze the image[^\n]*",
        r"(?i)Let me use the \w+ tool[^\n]*",
        r"(?i)I'll use the \w+ tool[^\n]*",
        r"(?i)I should use the \w+ tool[^\n]*",
        r"(?i)Using the \w+ tool[^\n]*",
        r"(?i)I'll read the image file[^\n]*",
        r"(?i)Let me access these images[^\n]*",
        r"(?i)(?:The )?(?:image )?file path is:\s*[^\n]*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static EXCESS_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n\s*\n+").expect("valid regex"));
static LEADING_BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t]*\n+").expect("valid regex"));

/// Filters one complete text block.
///
/// Whitespace is renormalized only when a pattern actually fired, so
/// clean text passes through byte-identical.
pub(crate) fn filter_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut filtered = SANDBOX_PATH
        .replace_all(text, NEUTRAL_WORKSPACE_PHRASE)
        .into_owned();
    filtered = TEMP_PATH
        .replace_all(&filtered, NEUTRAL_TEMP_PHRASE)
        .into_owned();
    for pattern in NARRATION_PATTERNS.iter() {
        filtered = pattern.replace_all(&filtered, "").into_owned();
    }

    if filtered == text {
        return filtered;
    }

    let collapsed = EXCESS_BLANK_LINES.replace_all(&filtered, "\n\n");
    LEADING_BLANK.replace(&collapsed, "").into_owned()
}

/// Boundary-buffered wrapper for streaming use.
///
/// A path or narration phrase may straddle chunk boundaries, so chunks
/// are held until a sentence or line boundary is seen, then the whole
/// buffer is filtered and flushed. [`StreamSanitizer::flush`] drains the
/// remainder at stream end.
#[derive(Debug, Default)]
pub(crate) struct StreamSanitizer {
    buffer: String,
}

const BOUNDARY_MARKERS: &[char] = &['.', '\n', '?', '!'];

impl StreamSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one chunk; returns filtered text when a boundary allows
    /// the buffer to be evaluated, `None` while still buffering.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        self.buffer.push_str(chunk);

        if self.buffer.contains(BOUNDARY_MARKERS) {
            let filtered = filter_text(&self.buffer);
            self.buffer.clear();
            if filtered.is_empty() {
                None
            } else {
                Some(filtered)
            }
        } else {
            None
        }
    }

    /// Filters and drains whatever remains at stream end.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let filtered = filter_text(&self.buffer);
        self.buffer.clear();
        if filtered.is_empty() {
            None
        } else {
            Some(filtered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_path_becomes_neutral_phrase() {
        let text = "The file lives at /tmp/claude_chat_sandbox_ab12cd34/foo.png for now.";
        let filtered = filter_text(text);
        assert!(filtered.contains(NEUTRAL_WORKSPACE_PHRASE));
        assert!(!filtered.contains("sandbox_ab12cd34"));
        assert!(!filtered.contains("/tmp/"));
    }

    #[test]
    fn test_own_sandbox_prefix_is_redacted() {
        let text = "saved under /tmp/ferry_sandbox_0f3a9b/image.png";
        let filtered = filter_text(text);
        assert!(filtered.contains(NEUTRAL_WORKSPACE_PHRASE));
        assert!(!filtered.contains("ferry_sandbox_"));
    }

    #[test]
    fn test_generic_temp_path_is_redacted() {
        let filtered = filter_text("scratch data in /var/folders/ab/T/item.dat here");
        assert!(filtered.contains(NEUTRAL_TEMP_PHRASE));
        assert!(!filtered.contains("/var/folders"));
    }

    #[test]
    fn test_narration_lines_are_removed() {
        let text = "Let me use the Read tool to open it.\nThe chart shows rising sales.";
        let filtered = filter_text(text);
        assert!(!filtered.to_lowercase().contains("read tool"));
        assert!(filtered.contains("The chart shows rising sales."));
    }

    #[test]
    fn test_clean_text_is_untouched() {
        let text = "Line one.\n\nLine two has  odd   spacing.\n";
        assert_eq!(filter_text(text), text);
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let text = "Using the Read tool now.\npath /tmp/ferry_sandbox_1234/x.png\n\n\nDone.";
        let once = filter_text(text);
        let twice = filter_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(filter_text(""), "");
    }

    #[test]
    fn test_stream_buffers_until_boundary() {
        let mut sanitizer = StreamSanitizer::new();
        assert_eq!(sanitizer.push("The answer"), None);
        let out = sanitizer.push(" is ready.").unwrap();
        assert_eq!(out, "The answer is ready.");
    }

    #[test]
    fn test_stream_catches_path_straddling_chunks() {
        let mut sanitizer = StreamSanitizer::new();
        assert_eq!(sanitizer.push("see /tmp/ferry_sand"), None);
        let out = sanitizer.push("box_99ff/pic.png now.").unwrap();
        assert!(out.contains(NEUTRAL_WORKSPACE_PHRASE));
        assert!(!out.contains("pic.png"));
    }

    #[test]
    fn test_stream_flush_drains_remainder() {
        let mut sanitizer = StreamSanitizer::new();
        assert_eq!(sanitizer.push("trailing words"), None);
        assert_eq!(sanitizer.flush(), Some("trailing words".to_string()));
        assert_eq!(sanitizer.flush(), None);
    }

    #[test]
    fn test_stream_drops_fully_filtered_buffer() {
        let mut sanitizer = StreamSanitizer::new();
        let out = sanitizer.push("Let me use the Read tool to check.\n");
        assert_eq!(out, None);
    }
}
