//! Boundary-aware text chunker.
//!
//! Splits extracted document text into [`Fragment`]s of at most
//! `max_chars` characters, preferring paragraph and sentence boundaries so
//! that fragments do not sever a thought mid-sentence.
//!
//! # Algorithm
//!
//! 1. Collapse runs of newlines into one and trim.
//! 2. Split on newlines into paragraphs, dropping empty ones.
//! 3. A paragraph longer than `max_chars` is split into sentences on Latin
//!    (`. ! ?`) and CJK (`。！？`) terminators; each sentence is one unit.
//!    A paragraph that fits is a single unit.
//! 4. Units accumulate in a buffer joined by `\n`. When adding the next
//!    unit would make the buffer reach `max_chars`, the buffer is flushed
//!    and a new one starts with that unit.
//! 5. The trailing buffer is flushed.
//! 6. If the input offered no boundary at all (nothing was produced, or the
//!    whole text is one oversized unit), fall back to a sliding window of
//!    `max_chars` characters with stride `max_chars - overlap`.
//!
//! Once the text has more than one unit, an oversized unit is kept whole,
//! even an unterminated paragraph following a short title line. `overlap`
//! only affects the sliding window.
//!
//! Lengths are measured in `char`s, not bytes.

use crate::models::Fragment;

/// Split text into chunks. Empty or degenerate input yields no chunks.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    if max_chars == 0 {
        return Vec::new();
    }

    let normalized = collapse_newlines(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;
    let mut units = 0usize;

    for para in normalized.split('\n') {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        if char_len(para) > max_chars {
            for sentence in split_sentences(para) {
                units += 1;
                push_unit(&mut chunks, &mut buf, &mut buf_chars, sentence, max_chars);
            }
        } else {
            units += 1;
            push_unit(&mut chunks, &mut buf, &mut buf_chars, para, max_chars);
        }
    }

    if !buf.trim().is_empty() {
        chunks.push(buf.trim().to_string());
    }

    let total = char_len(&normalized);
    let unsplittable = units == 1 && total > max_chars;
    if (chunks.is_empty() || unsplittable) && total > max_chars {
        return sliding_window(&normalized, max_chars, overlap);
    }

    chunks
}

/// Chunk a document into fragments carrying `source` and contiguous indices.
pub fn chunk_document(source: &str, text: &str, max_chars: usize, overlap: usize) -> Vec<Fragment> {
    chunk_text(text, max_chars, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, t)| Fragment::new(t, source, i))
        .collect()
}

/// Strip replacement characters and control characters, collapse
/// horizontal whitespace, trim every line and drop blank lines.
pub fn clean_text(text: &str) -> String {
    let filtered: String = text
        .chars()
        .filter(|&c| c != '\u{FFFD}')
        .filter(|&c| c == '\n' || c == '\t' || !(c.is_control()))
        .collect();

    filtered
        .lines()
        .map(collapse_horizontal_ws)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_unit(
    chunks: &mut Vec<String>,
    buf: &mut String,
    buf_chars: &mut usize,
    unit: &str,
    max_chars: usize,
) {
    let unit_chars = char_len(unit);
    if *buf_chars + unit_chars < max_chars {
        buf.push_str(unit);
        buf.push('\n');
        *buf_chars += unit_chars + 1;
        return;
    }

    if !buf.trim().is_empty() {
        chunks.push(buf.trim().to_string());
    }
    buf.clear();
    buf.push_str(unit);
    buf.push('\n');
    *buf_chars = unit_chars + 1;
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if !is_terminator(c) {
            continue;
        }
        let next = iter.peek().map(|&(_, n)| n);
        // Keep runs like "?!" or "..." together.
        if next.is_some_and(is_terminator) {
            continue;
        }
        // A Latin period only ends a sentence before whitespace, so "3.14" survives.
        if c == '.' && !next.map_or(true, char::is_whitespace) {
            continue;
        }
        let end = i + c.len_utf8();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

fn sliding_window(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let stride = if overlap < max_chars {
        max_chars - overlap
    } else {
        max_chars
    };

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_newline = false;
    for c in text.chars() {
        if c == '\r' {
            continue;
        }
        if c == '\n' {
            if !prev_newline {
                out.push('\n');
            }
            prev_newline = true;
        } else {
            out.push(c);
            prev_newline = false;
        }
    }
    out.trim().to_string()
}

fn collapse_horizontal_ws(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
