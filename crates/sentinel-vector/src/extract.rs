//! Document extraction capability.
//!
//! Extractors turn raw bytes into plain text. They never fail: corrupt or
//! unsupported input yields empty text plus an error marker in the parse
//! metadata, which the pipeline classifies as `ExtractionEmpty`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parser details recorded alongside extracted text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub parser: String,
    pub encoding: Option<String>,
    pub byte_len: usize,
    pub error: Option<String>,
}

impl ParseMetadata {
    /// Flatten into chunk attributes.
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert("parser".to_string(), self.parser.clone());
        if let Some(ref encoding) = self.encoding {
            attrs.insert("encoding".to_string(), encoding.clone());
        }
        attrs.insert("byte_len".to_string(), self.byte_len.to_string());
        attrs
    }
}

/// Output of an extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub metadata: ParseMetadata,
}

impl Extraction {
    /// True when there is no usable text.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Converts raw document bytes to plain text.
pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8], filename: &str) -> Extraction;
}

/// UTF-8 text extractor with a Latin-1 fallback.
///
/// Binary PDF payloads are recognised by their magic header and reported as
/// unsupported; a `.pdf` filename carrying plain text is decoded as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], _filename: &str) -> Extraction {
        if bytes.starts_with(b"%PDF") {
            return Extraction {
                text: String::new(),
                metadata: ParseMetadata {
                    parser: "none".to_string(),
                    encoding: None,
                    byte_len: bytes.len(),
                    error: Some("pdf decoding unavailable".to_string()),
                },
            };
        }

        let (text, encoding) = match std::str::from_utf8(bytes) {
            Ok(s) => (s.to_string(), "utf-8"),
            Err(_) => (bytes.iter().map(|&b| b as char).collect(), "latin-1"),
        };

        let error = text
            .trim()
            .is_empty()
            .then(|| "document contains no text".to_string());

        Extraction {
            text,
            metadata: ParseMetadata {
                parser: "text".to_string(),
                encoding: Some(encoding.to_string()),
                byte_len: bytes.len(),
                error,
            },
        }
    }
}
