//! # Message Framing
//!
//! Peers exchange discrete messages over a byte stream. A per-connection
//! charset and delimiter split the stream:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stream Framing                                   │
//! │                                                                         │
//! │   ...<message bytes><delimiter><message bytes><delimiter>...            │
//! │                                                                         │
//! │   • delimiter: arbitrary byte sequence (default "\r\n")                 │
//! │   • charset:   utf8 | ascii | latin1                                    │
//! │   • the delimiter may straddle read chunks; the splitter keeps          │
//! │     a partial-match tail between feeds                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{LinkError, LinkResult};

// =============================================================================
// Charset
// =============================================================================

/// Text encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    /// UTF-8 (default).
    Utf8,
    /// Strict 7-bit ASCII.
    Ascii,
    /// ISO-8859-1, one byte per char.
    Latin1,
}

impl Default for Charset {
    fn default() -> Self {
        Charset::Utf8
    }
}

impl Charset {
    /// Encodes text into connection bytes.
    pub fn encode(&self, text: &str) -> LinkResult<Vec<u8>> {
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Ascii => {
                if !text.is_ascii() {
                    return Err(LinkError::Charset(
                        "non-ASCII character in ASCII-framed message".to_string(),
                    ));
                }
                Ok(text.as_bytes().to_vec())
            }
            Charset::Latin1 => text
                .chars()
                .map(|c| {
                    let code = c as u32;
                    if code <= 0xFF {
                        Ok(code as u8)
                    } else {
                        Err(LinkError::Charset(format!(
                            "character U+{:04X} not representable in latin1",
                            code
                        )))
                    }
                })
                .collect(),
        }
    }

    /// Decodes connection bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> LinkResult<String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| LinkError::Charset(format!("invalid UTF-8: {}", e))),
            Charset::Ascii => {
                if !bytes.is_ascii() {
                    return Err(LinkError::Charset("non-ASCII byte in message".to_string()));
                }
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            Charset::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

impl std::fmt::Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Charset::Utf8 => write!(f, "utf8"),
            Charset::Ascii => write!(f, "ascii"),
            Charset::Latin1 => write!(f, "latin1"),
        }
    }
}

impl std::str::FromStr for Charset {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Charset::Utf8),
            "ascii" | "us-ascii" => Ok(Charset::Ascii),
            "latin1" | "iso-8859-1" => Ok(Charset::Latin1),
            other => Err(LinkError::Config(format!("unknown charset '{}'", other))),
        }
    }
}

// =============================================================================
// Framing
// =============================================================================

/// Per-connection framing: charset plus message delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    /// Text encoding for message bodies.
    pub charset: Charset,
    /// Byte sequence terminating each message.
    pub delimiter: Vec<u8>,
}

impl Default for Framing {
    fn default() -> Self {
        Framing {
            charset: Charset::Utf8,
            delimiter: b"\r\n".to_vec(),
        }
    }
}

impl Framing {
    /// Creates a framing config; the delimiter must be nonempty.
    pub fn new(charset: Charset, delimiter: &[u8]) -> LinkResult<Self> {
        if delimiter.is_empty() {
            return Err(LinkError::Config("empty message delimiter".to_string()));
        }
        Ok(Framing {
            charset,
            delimiter: delimiter.to_vec(),
        })
    }

    /// Encodes one message body and appends the delimiter.
    pub fn encode_frame(&self, body: &str) -> LinkResult<Vec<u8>> {
        let mut bytes = self.charset.encode(body)?;
        bytes.extend_from_slice(&self.delimiter);
        Ok(bytes)
    }
}

// =============================================================================
// Frame Splitter
// =============================================================================

/// Incremental splitter turning a byte stream into delimited messages.
///
/// Feed raw reads in any chunking; complete message bodies come out in
/// order. Bytes after the last delimiter stay pending until more input
/// arrives.
pub struct FrameSplitter {
    framing: Framing,
    pending: Vec<u8>,
}

impl FrameSplitter {
    /// Creates a splitter for the given framing.
    pub fn new(framing: Framing) -> Self {
        FrameSplitter {
            framing,
            pending: Vec::new(),
        }
    }

    /// Feeds a chunk of raw bytes, returning every complete message body.
    pub fn feed(&mut self, chunk: &[u8]) -> LinkResult<Vec<String>> {
        self.pending.extend_from_slice(chunk);

        let delimiter = self.framing.delimiter.clone();
        let mut messages = Vec::new();
        let mut start = 0usize;

        while let Some(pos) = find_subsequence(&self.pending[start..], &delimiter) {
            let end = start + pos;
            let body = self.framing.charset.decode(&self.pending[start..end])?;
            messages.push(body);
            start = end + delimiter.len();
        }

        if start > 0 {
            self.pending.drain(..start);
        }

        Ok(messages)
    }

    /// Number of buffered bytes awaiting a delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_round_trips() {
        assert_eq!(Charset::Utf8.decode(&Charset::Utf8.encode("héllo").unwrap()).unwrap(), "héllo");
        assert_eq!(
            Charset::Latin1.decode(&Charset::Latin1.encode("café").unwrap()).unwrap(),
            "café"
        );
        assert_eq!(
            Charset::Ascii.decode(&Charset::Ascii.encode("plain").unwrap()).unwrap(),
            "plain"
        );
    }

    #[test]
    fn test_charset_rejects_unrepresentable_text() {
        assert!(Charset::Ascii.encode("héllo").is_err());
        assert!(Charset::Latin1.encode("日本").is_err());
        assert!(Charset::Ascii.decode(&[0x80]).is_err());
    }

    #[test]
    fn test_empty_delimiter_is_rejected() {
        assert!(Framing::new(Charset::Utf8, b"").is_err());
    }

    #[test]
    fn test_splitter_basic() {
        let framing = Framing::new(Charset::Utf8, b"\r\n").unwrap();
        let mut splitter = FrameSplitter::new(framing);

        let messages = splitter.feed(b"first\r\nsecond\r\n").unwrap();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(splitter.pending_len(), 0);
    }

    #[test]
    fn test_splitter_keeps_partial_message() {
        let framing = Framing::new(Charset::Utf8, b"\r\n").unwrap();
        let mut splitter = FrameSplitter::new(framing);

        assert!(splitter.feed(b"par").unwrap().is_empty());
        let messages = splitter.feed(b"tial\r\nrest").unwrap();
        assert_eq!(messages, vec!["partial"]);
        assert_eq!(splitter.pending_len(), 4);
    }

    // The delimiter itself may arrive split across reads.
    #[test]
    fn test_splitter_handles_straddled_delimiter() {
        let framing = Framing::new(Charset::Utf8, b"||END||").unwrap();
        let mut splitter = FrameSplitter::new(framing);

        assert!(splitter.feed(b"message||EN").unwrap().is_empty());
        let messages = splitter.feed(b"D||next||END||").unwrap();
        assert_eq!(messages, vec!["message", "next"]);
    }

    #[test]
    fn test_splitter_with_multibyte_delimiter_and_latin1() {
        let framing = Framing::new(Charset::Latin1, &[0x00, 0xFF]).unwrap();
        let mut splitter = FrameSplitter::new(framing);

        let mut input = Charset::Latin1.encode("café").unwrap();
        input.extend_from_slice(&[0x00, 0xFF]);
        let messages = splitter.feed(&input).unwrap();
        assert_eq!(messages, vec!["café"]);
    }

    #[test]
    fn test_encode_frame_appends_delimiter() {
        let framing = Framing::new(Charset::Utf8, b";;").unwrap();
        let bytes = framing.encode_frame("body").unwrap();
        assert_eq!(bytes, b"body;;");
    }
}
