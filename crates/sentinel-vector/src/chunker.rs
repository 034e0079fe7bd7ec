//! Sentence-boundary chunking with token-estimated overlap.
//!
//! Text is split where end-of-sentence punctuation is followed by
//! whitespace and an upper-case letter. Sentences accumulate into a chunk
//! until the estimated token count would exceed `max_tokens`; the next
//! chunk is then seeded with trailing sentences of the previous one until
//! the seed reaches `overlap_tokens`. The seed never includes the closed
//! chunk's first sentence and never grows past what leaves room for the
//! incoming sentence, so a chunk only exceeds `max_tokens` when a single
//! sentence does.
//!
//! Chunks are slices of the original text, so a document that fits in one
//! chunk is returned unchanged.

use std::sync::LazyLock;

use regex::Regex;

use sentinel_core::config::ChunkingConfig;

static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s+").unwrap());

/// Byte range of one sentence within the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Splits documents into bounded, overlapping chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
    tokens_per_word: f64,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(&ChunkingConfig::default())
    }
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            overlap_tokens: config.overlap_tokens,
            tokens_per_word: config.tokens_per_word,
        }
    }

    /// Estimated model tokens: whitespace word count times a constant.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        (text.split_whitespace().count() as f64 * self.tokens_per_word) as usize
    }

    /// Split text into sentences at punctuation + whitespace + capital.
    pub fn split_sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        sentence_spans(text)
            .into_iter()
            .map(|s| &text[s.start..s.end])
            .collect()
    }

    /// Chunk `text`. Never fails and never returns an empty vector; empty
    /// input yields a single empty chunk.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let spans = sentence_spans(text);
        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<(Span, usize)> = Vec::new();
        let mut current_tokens = 0usize;

        for span in spans {
            let tokens = self.estimate_tokens(&text[span.start..span.end]);

            if current_tokens + tokens > self.max_tokens && !current.is_empty() {
                chunks.push(join_spans(text, &current));

                if self.overlap_tokens > 0 {
                    let budget = self.max_tokens.saturating_sub(tokens);
                    let mut keep = 0usize;
                    let mut carried = 0usize;
                    for (_, t) in current.iter().skip(1).rev() {
                        if carried >= self.overlap_tokens || carried + t > budget {
                            break;
                        }
                        carried += t;
                        keep += 1;
                    }
                    current.drain(..current.len() - keep);
                    current_tokens = carried;
                } else {
                    current.clear();
                    current_tokens = 0;
                }
            }

            current.push((span, tokens));
            current_tokens += tokens;
        }

        if !current.is_empty() {
            chunks.push(join_spans(text, &current));
        }

        if chunks.is_empty() {
            chunks.push(text.to_string());
        }
        chunks
    }
}

/// Contiguous source slice covering the first to the last span.
fn join_spans(text: &str, spans: &[(Span, usize)]) -> String {
    match (spans.first(), spans.last()) {
        (Some((first, _)), Some((last, _))) => text[first.start..last.end].to_string(),
        _ => String::new(),
    }
}

fn sentence_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0usize;

    for m in BOUNDARY_RE.find_iter(text) {
        let next_is_upper = text[m.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase());
        if !next_is_upper {
            continue;
        }
        // Keep the punctuation, drop the whitespace.
        spans.push(Span {
            start,
            end: m.start() + 1,
        });
        start = m.end();
    }

    spans.push(Span {
        start,
        end: text.len(),
    });
    spans
}
