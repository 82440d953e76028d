//! Output bounding, ANSI stripping and secret redaction
//!
//! Everything handed back to an operator goes through here: the reply channel
//! is size constrained and the producers (child processes, terminal
//! scrollback) are not.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

/// Prefix inserted when output was cut. Always counted inside the bound.
pub const TRUNCATION_MARKER: &str = "[... output truncated ...]\n";

static SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(sk-[a-zA-Z0-9_\-]{20,}|ghp_[a-zA-Z0-9]{20,}|ghu_[a-zA-Z0-9]{20,}|xoxb-[a-zA-Z0-9\-]{20,}|AKIA[0-9A-Z]{16})",
    )
    .expect("secret redaction regex")
});

/// Character count of [`TRUNCATION_MARKER`].
#[must_use]
pub fn marker_len() -> usize {
    TRUNCATION_MARKER.chars().count()
}

/// Keep the last `max_chars` characters of `text`.
///
/// When truncation happens the result is exactly `max_chars` characters long
/// and starts with [`TRUNCATION_MARKER`].
#[must_use]
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let marker = marker_len();
    if max_chars <= marker {
        return text.chars().skip(total - max_chars).collect();
    }
    let keep = max_chars - marker;
    let mut out = String::with_capacity(max_chars * 4);
    out.push_str(TRUNCATION_MARKER);
    out.extend(text.chars().skip(total - keep));
    out
}

/// Bound terminal scrollback to the last `max_lines` non-blank-trailing lines
/// and `max_chars` characters. A single marker is used for either cut.
#[must_use]
pub fn bound_reply(text: &str, max_lines: usize, max_chars: usize) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let cut_lines = lines.len() > max_lines;
    let kept = &lines[lines.len().saturating_sub(max_lines)..];
    let joined = kept.join("\n");

    if !cut_lines {
        return tail_chars(&joined, max_chars);
    }
    let marker = marker_len();
    if max_chars <= marker {
        return tail_chars(&joined, max_chars);
    }
    let body = tail_chars(&joined, max_chars - marker);
    if body.starts_with(TRUNCATION_MARKER) {
        // already marked by the char cut; re-cut to the full budget instead
        return tail_chars(&joined, max_chars);
    }
    format!("{}{}", TRUNCATION_MARKER, body)
}

/// Rolling byte buffer that keeps only the most recent `capacity` bytes.
#[derive(Debug)]
pub struct TailBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
    total: usize,
}

impl TailBuffer {
    /// Buffer sized to hold `max_chars` characters of any UTF-8 text.
    #[must_use]
    pub fn for_chars(max_chars: usize) -> Self {
        let capacity = max_chars.saturating_mul(4).max(64);
        Self {
            bytes: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
            total: 0,
        }
    }

    /// Append a chunk, discarding the oldest bytes past capacity.
    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let chunk = if chunk.len() > self.capacity {
            &chunk[chunk.len() - self.capacity..]
        } else {
            chunk
        };
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    /// Total bytes ever pushed.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Decode, mask secrets and bound to `max_chars`, marking the cut if any
    /// bytes were dropped or the text is still too long.
    ///
    /// Masking runs before the cut so a token straddling it is never
    /// half-kept.
    #[must_use]
    pub fn finish(self, max_chars: usize) -> String {
        let dropped = self.total > self.bytes.len();
        let raw: Vec<u8> = self.bytes.into_iter().collect();
        let decoded = String::from_utf8_lossy(&raw);
        // a cut can land inside a multibyte sequence
        let text = if dropped {
            decoded.trim_start_matches('\u{FFFD}')
        } else {
            &decoded
        };
        let text = redact_secrets(&strip_ansi_escapes(text));
        if dropped && text.chars().count() <= max_chars {
            return force_marker(&text, max_chars);
        }
        tail_chars(&text, max_chars)
    }
}

fn force_marker(text: &str, max_chars: usize) -> String {
    let marker = marker_len();
    if max_chars <= marker {
        return tail_chars(text, max_chars);
    }
    let keep = max_chars - marker;
    let total = text.chars().count();
    let mut out = String::from(TRUNCATION_MARKER);
    out.extend(text.chars().skip(total.saturating_sub(keep)));
    out
}

/// Mask credential-looking tokens.
#[must_use]
pub fn redact_secrets(text: &str) -> String {
    SECRET_RE.replace_all(text, "[REDACTED]").into_owned()
}

/// Strip ANSI escape sequences and carriage returns.
#[must_use]
pub fn strip_ansi_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // parameter and intermediate bytes
                while let Some(&next) = chars.peek() {
                    if next.is_ascii() && (0x20..=0x3F).contains(&(next as u8)) {
                        chars.next();
                    } else {
                        break;
                    }
                }
                // final byte
                if let Some(&next) = chars.peek() {
                    if next.is_ascii() && (0x40..=0x7E).contains(&(next as u8)) {
                        chars.next();
                    }
                }
            } else if chars.peek() == Some(&']') {
                // OSC: ESC ] ... (BEL | ESC \)
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
        } else if c != '\r' {
            result.push(c);
        }
    }
    result
}
