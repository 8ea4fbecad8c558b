//! Content Disarm & Reconstruct
//!
//! Produces the sanitized copy returned alongside a blocked detection:
//! control and invisible characters are dropped, then script blocks,
//! markup, inline handlers and executable protocol prefixes are stripped.

use crate::models::DetectError;
use regex::Regex;

/// Maximum content size for sanitization (10MB)
pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024;

/// Strip control, zero-width and bidi-override characters.
///
/// Newlines, carriage returns and tabs survive.
pub fn sanitize_text(input: &str) -> Result<String, DetectError> {
    if input.len() > MAX_CONTENT_SIZE {
        return Err(DetectError::TooLarge {
            size: input.len(),
            max: MAX_CONTENT_SIZE,
        });
    }

    Ok(input
        .chars()
        .filter(|&c| match c {
            '\n' | '\r' | '\t' => true,
            '\u{200B}'..='\u{200F}' => false, // Zero-width chars
            '\u{202A}'..='\u{202E}' => false, // Directional formatting
            '\u{2060}'..='\u{2064}' => false, // Word joiner, invisible chars
            '\u{FEFF}' => false,              // BOM
            c => !c.is_control(),
        })
        .collect())
}

/// Strips markup and executable prefixes.
#[derive(Debug, Clone)]
pub struct MarkupStripper {
    script_blocks: Regex,
    tags: Regex,
    handlers: Regex,
    protocols: Regex,
}

impl MarkupStripper {
    /// Compiles the stripping rules.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            script_blocks: Regex::new(r"(?is)<\s*(script|style|iframe)\b.*?<\s*/\s*(script|style|iframe)\s*>")?,
            tags: Regex::new(r"(?s)<\s*/?\s*[a-zA-Z!][^>]*>?")?,
            handlers: Regex::new(r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]*)"#)?,
            protocols: Regex::new(r"(?i)\b(javascript|vbscript|livescript)\s*:|\bdata\s*:\s*text/html[^,]*,?")?,
        })
    }

    /// Removes script blocks, tags, inline handlers and protocol prefixes.
    pub fn strip(&self, input: &str) -> String {
        let out = self.script_blocks.replace_all(input, "");
        let out = self.tags.replace_all(&out, "");
        let out = self.handlers.replace_all(&out, "");
        self.protocols.replace_all(&out, "").into_owned()
    }

    /// Full sanitization: [`sanitize_text`] then [`strip`](Self::strip).
    /// Content over [`MAX_CONTENT_SIZE`] sanitizes to the empty string.
    pub fn sanitize(&self, input: &str) -> String {
        match sanitize_text(input) {
            Ok(text) => self.strip(&text),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripper() -> MarkupStripper {
        MarkupStripper::new().unwrap()
    }

    #[test]
    fn test_sanitize_normal_text() {
        let input = "Hello, world! This is a test.";
        assert_eq!(sanitize_text(input).unwrap(), input);
    }

    #[test]
    fn test_sanitize_strips_control_and_zero_width() {
        assert_eq!(sanitize_text("Hello\x00World\x1F!").unwrap(), "HelloWorld!");
        assert_eq!(sanitize_text("Hi\u{200B}there\u{FEFF}").unwrap(), "Hithere");
        assert_eq!(sanitize_text("Line 1\nLine 2\r\n").unwrap(), "Line 1\nLine 2\r\n");
    }

    #[test]
    fn test_size_limit() {
        let large = "x".repeat(MAX_CONTENT_SIZE + 1);
        assert!(matches!(sanitize_text(&large), Err(DetectError::TooLarge { .. })));
        assert_eq!(stripper().sanitize(&large), "");
    }

    #[test]
    fn test_strip_script_block() {
        let out = stripper().strip("before<script>alert(1)</script>after");
        assert_eq!(out, "beforeafter");
    }

    #[test]
    fn test_strip_tags_and_handlers() {
        let out = stripper().strip(r#"<img src=x onerror="alert(1)">caption <b>bold</b>"#);
        assert_eq!(out, "caption bold");
    }

    #[test]
    fn test_strip_protocols() {
        let out = stripper().strip("click javascript:alert(1) now");
        assert_eq!(out, "click alert(1) now");
    }
}
