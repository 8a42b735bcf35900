//! Newline-delimited JSON framing for streamed responses.
//!
//! Network reads do not respect line boundaries, and a read may end in the
//! middle of a multi-byte UTF-8 character. Bytes are buffered until a `\n`
//! arrives; only complete lines are decoded.

use super::traits::{Fragment, GenerationError};
use serde::Deserialize;

#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed (without terminators).
    /// Blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !is_blank(&line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Trailing unterminated line left at end of input, if any.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        (!is_blank(&rest)).then_some(rest)
    }

    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

// ─── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default = "default_role")]
    role: String,
    #[serde(default)]
    content: String,
}

fn default_role() -> String {
    "assistant".to_string()
}

/// Decode one line into zero, one or two fragments.
///
/// A final line carrying both content and `done: true` yields the token
/// followed by [`Fragment::Done`].
pub fn decode_line(line: &[u8]) -> Result<Vec<Fragment>, GenerationError> {
    let parsed: StreamLine = serde_json::from_slice(line).map_err(|e| {
        let raw = String::from_utf8_lossy(line);
        GenerationError::Protocol(format!(
            "invalid stream line ({e}): {}",
            crate::util::error_excerpt(&raw)
        ))
    })?;

    if let Some(err) = parsed.error {
        return Err(GenerationError::Transport(format!(
            "inference server reported: {}",
            crate::util::error_excerpt(&err)
        )));
    }

    if parsed.message.is_none() && parsed.done.is_none() {
        let raw = String::from_utf8_lossy(line);
        return Err(GenerationError::Protocol(format!(
            "stream line has neither message nor done: {}",
            crate::util::error_excerpt(&raw)
        )));
    }

    let mut out = Vec::with_capacity(2);
    if let Some(msg) = parsed.message {
        if !msg.content.is_empty() {
            out.push(Fragment::Token {
                role: msg.role,
                content: msg.content,
            });
        }
    }
    if parsed.done == Some(true) {
        out.push(Fragment::Done);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_reads() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"done\":fa").is_empty());
        let lines = buf.push(b"lse}\n{\"done\":true}\n");
        assert_eq!(lines, vec![b"{\"done\":false}".to_vec(), b"{\"done\":true}".to_vec()]);
        assert_eq!(buf.buffered_len(), 0);
    }

    #[test]
    fn reassembles_multibyte_chars_split_mid_sequence() {
        let line = "{\"message\":{\"role\":\"assistant\",\"content\":\"h\u{e9}\u{1F980}\"},\"done\":false}\n";
        let bytes = line.as_bytes();
        // Cut inside the 4-byte crab emoji.
        let crab_start = line.find('\u{1F980}').unwrap();
        let mut buf = LineBuffer::new();
        assert!(buf.push(&bytes[..crab_start + 2]).is_empty());
        let lines = buf.push(&bytes[crab_start + 2..]);
        assert_eq!(lines.len(), 1);

        let fragments = decode_line(&lines[0]).unwrap();
        assert_eq!(
            fragments,
            vec![Fragment::Token {
                role: "assistant".into(),
                content: "h\u{e9}\u{1F980}".into()
            }]
        );
    }

    #[test]
    fn skips_blank_lines_and_strips_cr() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"\n  \n{\"done\":true}\r\n\n");
        assert_eq!(lines, vec![b"{\"done\":true}".to_vec()]);
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"{\"done\":true}");
        assert_eq!(buf.finish(), Some(b"{\"done\":true}".to_vec()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn finish_ignores_whitespace_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"  \t");
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn decode_done_with_content_yields_token_then_done() {
        let line = br#"{"message":{"role":"assistant","content":"!"},"done":true}"#;
        let fragments = decode_line(line).unwrap();
        assert_eq!(
            fragments,
            vec![
                Fragment::Token {
                    role: "assistant".into(),
                    content: "!".into()
                },
                Fragment::Done
            ]
        );
    }

    #[test]
    fn decode_empty_content_yields_nothing() {
        let line = br#"{"message":{"role":"assistant","content":""},"done":false}"#;
        assert!(decode_line(line).unwrap().is_empty());
    }

    #[test]
    fn decode_invalid_json_is_protocol_error() {
        let err = decode_line(b"not json").unwrap_err();
        assert!(matches!(err, GenerationError::Protocol(_)));
    }

    #[test]
    fn decode_shapeless_object_is_protocol_error() {
        let err = decode_line(br#"{"model":"llama3.2"}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Protocol(_)));
    }

    #[test]
    fn decode_error_field_is_transport_error() {
        let err = decode_line(br#"{"error":"model 'x' not found"}"#).unwrap_err();
        match err {
            GenerationError::Transport(msg) => assert!(msg.contains("model 'x' not found")),
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
