//! Deterministic chunking of source text.
//!
//! Splits file content into size-bounded, overlapping chunks along
//! language-aware boundaries. For known languages the split points come
//! from Tree-sitter syntax nodes (functions, classes, blocks); unknown
//! languages fall back to paragraph and line boundaries. The same input
//! and parameters always yield byte-identical chunks — the content-
//! addressed id scheme and idempotent re-indexing depend on this.
use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::languages::LanguageConfig;

/// Chunking parameters, in characters.
#[derive(Debug, Clone)]
pub struct ChunkParams {
    /// Maximum chunk size. A single semantic unit (one line, one syntax
    /// node with no children) may exceed it and is kept whole.
    pub max_size: usize,
    /// Chunks below this are merged with a neighbor where possible; a
    /// trailing remainder may stay small.
    pub min_size: usize,
    /// Target number of characters repeated from the previous chunk to
    /// preserve cross-boundary context.
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_size: 1000,
            min_size: 300,
            overlap: 200,
        }
    }
}

/// A contiguous slice of a file's text. Line numbers are 1-indexed and
/// inclusive; `start_line` includes the overlap carried from the
/// previous chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Split `content` into chunks. Returns an empty vec for blank input.
pub fn chunk_text(
    content: &str,
    language: Option<&LanguageConfig>,
    params: &ChunkParams,
) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = content.lines().collect();
    let last = lines.len() - 1;

    // Reserve room for the leading overlap so the final chunk length
    // (overlap + body) stays within max_size.
    let budget = if params.max_size > params.overlap {
        params.max_size - params.overlap
    } else {
        params.max_size
    };

    // 1. Semantic units as line spans covering the whole file.
    let units = match language {
        Some(cfg) => syntax_units(content, cfg, &lines, budget)
            .unwrap_or_else(|| paragraph_units(&lines)),
        None => paragraph_units(&lines),
    };

    // 2. Any unit still over budget is split at line boundaries; a single
    //    oversize line stays whole.
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for (s, e) in units {
        if span_chars(&lines, s, e) > budget {
            spans.extend(split_span_by_lines(&lines, s, e, budget));
        } else {
            spans.push((s, e));
        }
    }
    debug_assert!(spans.first().map(|s| s.0) == Some(0) && spans.last().map(|s| s.1) == Some(last));

    // 3. Greedy packing of adjacent spans up to the budget.
    let mut packed: Vec<(usize, usize)> = Vec::new();
    let mut cur: Option<(usize, usize, usize)> = None;
    for (s, e) in spans {
        let len = span_chars(&lines, s, e);
        cur = match cur {
            None => Some((s, e, len)),
            Some((cs, _, cl)) if cl + 1 + len <= budget => Some((cs, e, cl + 1 + len)),
            Some((cs, ce, _)) => {
                packed.push((cs, ce));
                Some((s, e, len))
            }
        };
    }
    if let Some((cs, ce, _)) = cur {
        packed.push((cs, ce));
    }

    merge_small_chunks(&lines, &mut packed, params.min_size, budget);
    materialize(&lines, &packed, params.overlap)
}

/// Character length of a line span, counting one newline between lines.
fn span_chars(lines: &[&str], start: usize, end: usize) -> usize {
    let mut total = 0;
    for (i, line) in lines[start..=end].iter().enumerate() {
        if i > 0 {
            total += 1;
        }
        total += line.chars().count();
    }
    total
}

// ── Unit extraction ──────────────────────────────────────────────────

/// Line spans of top-level syntax items, recursing into items larger than
/// `budget`. Gaps between items (blank lines, stray tokens) become their
/// own units so the spans cover every line. Returns `None` when the
/// grammar cannot parse the content.
fn syntax_units(
    content: &str,
    cfg: &LanguageConfig,
    lines: &[&str],
    budget: usize,
) -> Option<Vec<(usize, usize)>> {
    let mut parser = Parser::new();
    if parser.set_language(&cfg.language).is_err() {
        debug!("grammar version mismatch for {}", cfg.name);
        return None;
    }
    let tree = parser.parse(content, None)?;

    let mut units = Vec::new();
    collect_node_spans(tree.root_node(), lines, budget, 0, lines.len() - 1, &mut units);
    if units.is_empty() { None } else { Some(units) }
}

/// Collect the line spans of `node`'s children within `[lo, hi]`, filling
/// uncovered gaps. Children longer than `budget` with children of their
/// own are descended into, so an oversize class body splits at its
/// methods rather than at arbitrary lines.
fn collect_node_spans(
    node: Node<'_>,
    lines: &[&str],
    budget: usize,
    lo: usize,
    hi: usize,
    out: &mut Vec<(usize, usize)>,
) {
    let mut cursor = node.walk();
    let mut next_free = lo;

    for child in node.children(&mut cursor) {
        let end = child.end_position().row.min(hi);
        if end < next_free {
            continue;
        }
        let start = child.start_position().row.max(next_free);
        if start > hi {
            break;
        }
        if start > next_free {
            out.push((next_free, start - 1));
        }
        if span_chars(lines, start, end) > budget && child.child_count() > 0 {
            collect_node_spans(child, lines, budget, start, end, out);
        } else {
            out.push((start, end));
        }
        next_free = end + 1;
    }

    if next_free <= hi {
        out.push((next_free, hi));
    }
}

/// Paragraph units for unknown languages: a new unit starts at a
/// non-blank line following a blank one, so runs of blank lines stay
/// attached to the preceding paragraph.
fn paragraph_units(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut units = Vec::new();
    let mut start = 0;
    for i in 1..lines.len() {
        if !lines[i].trim().is_empty() && lines[i - 1].trim().is_empty() {
            units.push((start, i - 1));
            start = i;
        }
    }
    units.push((start, lines.len() - 1));
    units
}

/// Split an oversize span at line boundaries, packing lines up to
/// `budget`. A single line longer than the budget remains whole.
fn split_span_by_lines(
    lines: &[&str],
    start: usize,
    end: usize,
    budget: usize,
) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut chunk_start = start;
    let mut len = 0;
    for i in start..=end {
        let line_len = lines[i].chars().count();
        if i > chunk_start && len + 1 + line_len > budget {
            out.push((chunk_start, i - 1));
            chunk_start = i;
            len = line_len;
        } else {
            len += if i == chunk_start { line_len } else { 1 + line_len };
        }
    }
    out.push((chunk_start, end));
    out
}

// ── Assembly ─────────────────────────────────────────────────────────

/// Merge chunks smaller than `min_size` into an adjacent chunk when the
/// result stays within `budget`. A trailing remainder that fits nowhere
/// is left as-is.
fn merge_small_chunks(
    lines: &[&str],
    chunks: &mut Vec<(usize, usize)>,
    min_size: usize,
    budget: usize,
) {
    let mut i = 0;
    while i < chunks.len() {
        let (s, e) = chunks[i];
        if span_chars(lines, s, e) >= min_size || chunks.len() == 1 {
            i += 1;
            continue;
        }
        if i > 0 && span_chars(lines, chunks[i - 1].0, e) <= budget {
            chunks[i - 1].1 = e;
            chunks.remove(i);
        } else if i + 1 < chunks.len() && span_chars(lines, s, chunks[i + 1].1) <= budget {
            chunks[i].1 = chunks[i + 1].1;
            chunks.remove(i + 1);
        } else {
            i += 1;
        }
    }
}

/// Turn line spans into final chunks, prefixing each chunk after the
/// first with up to `overlap` characters of whole trailing lines from
/// its predecessor.
fn materialize(lines: &[&str], chunks: &[(usize, usize)], overlap: usize) -> Vec<Chunk> {
    let mut out = Vec::with_capacity(chunks.len());
    for (idx, &(start, end)) in chunks.iter().enumerate() {
        let mut text_start = start;
        if idx > 0 && overlap > 0 {
            let (prev_start, prev_end) = chunks[idx - 1];
            let mut taken = 0;
            let mut line = prev_end as i64;
            while line >= prev_start as i64 {
                let cost = lines[line as usize].chars().count() + 1;
                if taken + cost > overlap {
                    break;
                }
                taken += cost;
                line -= 1;
            }
            text_start = (line + 1) as usize;
            if text_start > prev_end {
                text_start = start;
            }
        }

        let text = lines[text_start..=end].join("\n");
        if text.trim().is_empty() {
            continue;
        }
        out.push(Chunk {
            text,
            start_line: text_start + 1,
            end_line: end + 1,
        });
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────
