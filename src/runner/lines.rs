//! Chunk-to-line reassembly for the streaming read loop.
//!
//! Output arrives in fixed-size byte chunks that split lines and UTF-8
//! sequences arbitrarily. The accumulator emits complete lines as soon as
//! their newline arrives and carries both the trailing partial line and
//! any trailing incomplete UTF-8 sequence into the next push.

/// Reassembles byte chunks into complete text lines.
#[derive(Debug, Default)]
pub(crate) struct LineAccumulator {
    /// Bytes of a UTF-8 sequence cut off at the end of the last chunk.
    byte_carry: Vec<u8>,
    /// Decoded text of the current, not-yet-terminated line.
    partial: String,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs one chunk and returns the complete lines it finished,
    /// without their trailing newline.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.byte_carry.extend_from_slice(chunk);

        let decoded = match std::str::from_utf8(&self.byte_carry) {
            Ok(text) => {
                let text = text.to_string();
                self.byte_carry.clear();
                text
            }
            Err(err) => {
                // Keep the incomplete trailing sequence for the next chunk;
                // anything before it is valid and can be decoded now.
                let valid_up_to = err.valid_up_to();
                if err.error_len().is_some() {
                    // Genuinely invalid bytes, not a chunk boundary: replace
                    // and move on rather than stall the stream.
                    let text = String::from_utf8_lossy(&self.byte_carry).into_owned();
                    self.byte_carry.clear();
                    text
                } else {
                    let text = std::str::from_utf8(&self.byte_carry[..valid_up_to])
                        .unwrap_or_default()
                        .to_string();
                    self.byte_carry.drain(..valid_up_to);
                    text
                }
            }
        };

        self.partial.push_str(&decoded);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop(); // the newline itself
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Drains the trailing unterminated line at end of stream, if any.
    /// Leftover invalid bytes are decoded lossily rather than dropped.
    pub fn flush_remainder(&mut self) -> Option<String> {
        if !self.byte_carry.is_empty() {
            self.partial
                .push_str(&String::from_utf8_lossy(&self.byte_carry));
            self.byte_carry.clear();
        }
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}
