//! Segmentation of generated replies into IRC-sized chat lines.
//!
//! IRC caps a whole protocol line at 512 bytes including the server-added
//! sender prefix, and any `\n` inside a PRIVMSG payload ends the command.
//! Replies therefore go out as a sequence of independent chunks, each of
//! which fits [`OutboundFormatter`]'s budget once its prefix is attached.
//!
//! Two layouts exist:
//!
//! - **Prose**: greedy packing with preferred break points (sentence end,
//!   then clause punctuation, then a space) so chunks read naturally.
//! - **Split**: a one-line explanation followed by code, divided on
//!   [`CODE_DELIMITER`]. Code lines are batched and joined with
//!   [`CODE_LINE_SEPARATOR`] since multi-line messages are impossible.

use regex::Regex;
use std::sync::LazyLock;

/// Default ceiling for one rendered chat line (prefix + body), in bytes.
pub const DEFAULT_MAX_LINE_LEN: usize = 400;

/// Bytes kept free below the ceiling on top of the prefix.
const SAFETY_MARGIN: usize = 10;

/// Marker the code template asks the model to put before its code.
pub const CODE_DELIMITER: &str = "CODE:";

/// Code lines sent per chat message.
pub const CODE_LINES_PER_CHUNK: usize = 4;

/// Separator standing in for newlines between batched code lines.
pub const CODE_LINE_SEPARATOR: &str = " | ";

const SENTENCE_BREAKS: &[&str] = &[". ", "? ", "! "];
const CLAUSE_BREAKS: &[&str] = &["; ", ", "];
const WORD_BREAKS: &[&str] = &[" "];

/// Break candidates in priority order.
const BREAK_TIERS: [&[&str]; 3] = [SENTENCE_BREAKS, CLAUSE_BREAKS, WORD_BREAKS];

/// A fence that ends its line, with an optional language tag: ```` ```python ````.
/// A word glued to a fence mid-line is code, not a tag.
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+#.-]*[ \t]*(?:\r?\n|\z)").unwrap());

/// How a reply should be laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    Prose,
    /// Explanation, then code after [`CODE_DELIMITER`].
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Prose,
    Code,
}

/// One outbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChunk {
    pub kind: ChunkKind,
    pub prefix: String,
    pub body: String,
}

impl OutboundChunk {
    /// Full payload as it goes on the wire after `PRIVMSG <target> :`.
    pub fn line(&self) -> String {
        format!("{}{}", self.prefix, self.body)
    }
}

/// Turns reply text into budget-compliant [`OutboundChunk`]s.
#[derive(Debug, Clone)]
pub struct OutboundFormatter {
    lead_prefix: String,
    continued_prefix: String,
    code_prefix: String,
    max_line_len: usize,
}

impl OutboundFormatter {
    pub fn new(nickname: &str, max_line_len: usize) -> Self {
        Self {
            lead_prefix: format!("{nickname}: "),
            continued_prefix: format!("{nickname}: ..."),
            code_prefix: format!("{nickname}: Code: "),
            max_line_len,
        }
    }

    /// Body budget for prose chunks. Sized for the longer continuation
    /// prefix so every prose chunk fits whichever prefix it gets.
    pub fn prose_budget(&self) -> usize {
        let prefix = self.lead_prefix.len().max(self.continued_prefix.len());
        self.budget_after(prefix)
    }

    pub fn code_budget(&self) -> usize {
        self.budget_after(self.code_prefix.len())
    }

    fn budget_after(&self, prefix_len: usize) -> usize {
        self.max_line_len
            .saturating_sub(SAFETY_MARGIN + prefix_len)
            .max(1)
    }

    /// Lay out a generated reply. Markdown is stripped in both modes.
    pub fn format(&self, text: &str, mode: FormatMode) -> Vec<OutboundChunk> {
        match mode {
            FormatMode::Prose => self.format_prose(&strip_markdown(text)),
            FormatMode::Split => self.format_split(text),
        }
    }

    /// Prose layout. Newlines collapse to spaces; empty input yields nothing.
    pub fn format_prose(&self, text: &str) -> Vec<OutboundChunk> {
        let flattened = text
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        split_prose(&flattened, self.prose_budget())
            .into_iter()
            .enumerate()
            .map(|(i, body)| OutboundChunk {
                kind: ChunkKind::Prose,
                prefix: if i == 0 {
                    self.lead_prefix.clone()
                } else {
                    self.continued_prefix.clone()
                },
                body,
            })
            .collect()
    }

    /// Explanation + code layout.
    pub fn format_split(&self, text: &str) -> Vec<OutboundChunk> {
        let cleaned = strip_markdown(text);
        let (explanation, code) = match cleaned.split_once(CODE_DELIMITER) {
            Some((explanation, code)) => (explanation, Some(code)),
            None => (cleaned.as_str(), None),
        };

        let mut chunks = self.format_prose(explanation);

        let Some(code) = code else {
            return chunks;
        };

        let lines: Vec<&str> = code
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        for batch in lines.chunks(CODE_LINES_PER_CHUNK) {
            let joined = batch.join(CODE_LINE_SEPARATOR);
            // A batch of long lines can still blow the budget.
            for body in split_prose(&joined, self.code_budget()) {
                chunks.push(OutboundChunk {
                    kind: ChunkKind::Code,
                    prefix: self.code_prefix.clone(),
                    body,
                });
            }
        }

        chunks
    }
}

/// Remove code fences and inline backticks.
pub fn strip_markdown(text: &str) -> String {
    CODE_FENCE.replace_all(text, "\n").replace('`', "")
}

/// Greedily pack `text` into trimmed pieces of at most `budget` bytes.
fn split_prose(text: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        if remaining.len() <= budget {
            chunks.push(remaining.to_string());
            break;
        }

        let (head, tail) = remaining.split_at(find_break(remaining, budget));
        let head = head.trim_end();
        if !head.is_empty() {
            chunks.push(head.to_string());
        }
        remaining = tail.trim_start();
    }

    chunks
}

/// Byte offset at which to cut `text`, which is longer than `budget`.
///
/// A separator qualifies only if it lies entirely within the budget and
/// starts past half of it. The punctuation stays with the left piece.
fn find_break(text: &str, budget: usize) -> usize {
    let window = &text[..floor_char_boundary(text, budget)];
    let min_pos = budget / 2;

    for tier in BREAK_TIERS {
        let best = tier
            .iter()
            .filter_map(|sep| window.rfind(sep))
            .filter(|&pos| pos > min_pos)
            .max();
        if let Some(pos) = best {
            return pos + 1;
        }
    }

    hard_cut(text, budget)
}

/// Cut at the budget, moved back to a char boundary. If the first char alone
/// is wider than the budget, cut after it instead.
fn hard_cut(text: &str, budget: usize) -> usize {
    let cut = floor_char_boundary(text, budget);
    if cut > 0 {
        return cut;
    }
    let mut cut = budget.max(1);
    while cut < text.len() && !text.is_char_boundary(cut) {
        cut += 1;
    }
    cut.min(text.len())
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> OutboundFormatter {
        OutboundFormatter::new("Bot", DEFAULT_MAX_LINE_LEN)
    }

    fn bodies(chunks: &[OutboundChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.body.as_str()).collect()
    }

    // ── Budget ──────────────────────────────────────────────

    #[test]
    fn budgets_account_for_prefix_and_margin() {
        let f = formatter();
        // "Bot: ..." is 8 bytes
        assert_eq!(f.prose_budget(), 400 - 10 - 8);
        // "Bot: Code: " is 11 bytes
        assert_eq!(f.code_budget(), 400 - 10 - 11);
    }

    #[test]
    fn tiny_line_len_still_has_positive_budget() {
        let f = OutboundFormatter::new("Bot", 5);
        assert_eq!(f.prose_budget(), 1);
        assert_eq!(bodies(&f.format_prose("ab")), vec!["a", "b"]);
    }

    // ── Prose ───────────────────────────────────────────────

    #[test]
    fn short_prose_is_one_trimmed_chunk() {
        let chunks = formatter().format_prose("   Paris is the capital of France.  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].body, "Paris is the capital of France.");
        assert_eq!(chunks[0].prefix, "Bot: ");
        assert_eq!(chunks[0].kind, ChunkKind::Prose);
        assert_eq!(chunks[0].line(), "Bot: Paris is the capital of France.");
    }

    #[test]
    fn empty_prose_yields_nothing() {
        assert!(formatter().format_prose("").is_empty());
        assert!(formatter().format_prose(" \n \r\n ").is_empty());
    }

    #[test]
    fn exact_budget_is_not_split() {
        let f = formatter();
        let text = "a".repeat(f.prose_budget());
        assert_eq!(f.format_prose(&text).len(), 1);
    }

    #[test]
    fn long_prose_breaks_at_sentence_near_midpoint() {
        let f = formatter();
        let budget = f.prose_budget();
        let first = format!("{}.", "word ".repeat(40).trim_end());
        let second = "tail ".repeat(80);
        let text = format!("{first} {second}");
        assert!(text.len() > budget && text.len() <= 2 * budget + 20);

        let chunks = f.format_prose(&text);
        assert_eq!(chunks[0].body, first);
        assert!(chunks[1].body.starts_with("tail"));
    }

    #[test]
    fn sentence_break_beats_later_clause_break() {
        let f = OutboundFormatter::new("B", 40);
        // budget = 40 - 10 - 6 = 24
        assert_eq!(f.prose_budget(), 24);
        let chunks = f.format_prose("aaaaaaaaaaaaaa. bbbb, cc dddddddd");
        assert_eq!(chunks[0].body, "aaaaaaaaaaaaaa.");
        assert_eq!(chunks[1].body, "bbbb, cc dddddddd");
    }

    #[test]
    fn clause_break_used_when_no_sentence_end() {
        let f = OutboundFormatter::new("B", 40);
        let chunks = f.format_prose("aaaaaaaaaaaaaa, bbbb cc dddddddddddd");
        assert_eq!(chunks[0].body, "aaaaaaaaaaaaaa,");
        assert_eq!(chunks[1].body, "bbbb cc dddddddddddd");
    }

    #[test]
    fn question_and_exclamation_end_sentences() {
        let f = OutboundFormatter::new("B", 40);
        let chunks = f.format_prose("why is it like that? because, ok then");
        assert_eq!(chunks[0].body, "why is it like that?");
        let chunks = f.format_prose("stop right there now! because, ok then");
        assert_eq!(chunks[0].body, "stop right there now!");
    }

    #[test]
    fn space_break_used_when_no_punctuation() {
        let f = OutboundFormatter::new("B", 40);
        let chunks = f.format_prose("aaaaaaaaaaaaaaaa bbbbbbbbbbbbbbbbbbbb");
        assert_eq!(bodies(&chunks), vec!["aaaaaaaaaaaaaaaa", "bbbbbbbbbbbbbbbbbbbb"]);
    }

    #[test]
    fn separators_in_first_half_are_ignored() {
        let f = OutboundFormatter::new("B", 40);
        // budget 24, the only sentence end sits at byte 2
        let chunks = f.format_prose("ab. cccccccccccccccccccccccccccccc");
        assert_eq!(chunks[0].body.len(), 24);
        assert!(chunks[0].body.starts_with("ab. ccc"));
    }

    #[test]
    fn hard_cut_without_separators() {
        let f = formatter();
        let budget = f.prose_budget();
        let text = "x".repeat(budget * 2 + 5);
        let chunks = f.format_prose(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].body.len(), budget);
        assert_eq!(chunks[1].body.len(), budget);
        assert_eq!(chunks[2].body.len(), 5);
    }

    #[test]
    fn hard_cut_respects_char_boundaries() {
        let f = OutboundFormatter::new("B", 19);
        // budget = 19 - 10 - 6 = 3; 'é' is two bytes
        let chunks = f.format_prose("éééé");
        assert_eq!(bodies(&chunks), vec!["é", "é", "é", "é"]);
    }

    #[test]
    fn continuation_chunks_use_continued_prefix() {
        let f = formatter();
        let text = "All good things. ".repeat(60);
        let chunks = f.format_prose(&text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].prefix, "Bot: ");
        for chunk in &chunks[1..] {
            assert_eq!(chunk.prefix, "Bot: ...");
        }
        for chunk in &chunks {
            assert!(chunk.line().len() <= DEFAULT_MAX_LINE_LEN);
            assert_eq!(chunk.body, chunk.body.trim());
        }
    }

    #[test]
    fn newlines_collapse_to_spaces() {
        let chunks = formatter().format_prose("first line\r\n\nsecond line\n");
        assert_eq!(bodies(&chunks), vec!["first line second line"]);
    }

    // ── Split ───────────────────────────────────────────────

    #[test]
    fn split_explanation_and_code() {
        let chunks = formatter().format_split("Lists store items.CODE:x = [1, 2]\ny = x[0]");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, ChunkKind::Prose);
        assert_eq!(chunks[0].body, "Lists store items.");
        assert_eq!(chunks[1].kind, ChunkKind::Code);
        assert_eq!(chunks[1].body, "x = [1, 2] | y = x[0]");
        assert_eq!(chunks[1].line(), "Bot: Code: x = [1, 2] | y = x[0]");
    }

    #[test]
    fn split_with_empty_explanation_sends_only_code() {
        let chunks = formatter().format_split("  CODE:\nprint(1)\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Code);
        assert_eq!(chunks[0].body, "print(1)");
    }

    #[test]
    fn split_without_delimiter_is_all_prose() {
        let chunks = formatter().format_split("Just an explanation.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Prose);
    }

    #[test]
    fn split_strips_markdown_fences() {
        let text = "Use a loop.\nCODE:\n```python\nfor i in range(3):\n    print(i)\n```\n";
        let chunks = formatter().format_split(text);
        assert_eq!(
            bodies(&chunks),
            vec!["Use a loop.", "for i in range(3): | print(i)"]
        );
    }

    #[test]
    fn split_strips_inline_backticks() {
        let chunks = formatter().format_split("Call `len`.CODE:`len(xs)`");
        assert_eq!(bodies(&chunks), vec!["Call len.", "len(xs)"]);
    }

    #[test]
    fn single_line_fence_keeps_first_token() {
        let chunks = formatter().format_split("List files.CODE:```ls -la```");
        assert_eq!(bodies(&chunks), vec!["List files.", "ls -la"]);
    }

    #[test]
    fn strip_markdown_drops_tag_only_before_newline() {
        assert_eq!(strip_markdown("```rust\nlet x = 1;\n```"), "\nlet x = 1;\n\n");
        assert_eq!(strip_markdown("```cargo build```"), "cargo build\n");
    }

    #[test]
    fn code_lines_batched_by_four() {
        let code: Vec<String> = (1..=9).map(|i| format!("line{i}")).collect();
        let text = format!("Explain.CODE:{}", code.join("\n\n"));
        let chunks = formatter().format_split(&text);
        assert_eq!(
            bodies(&chunks),
            vec![
                "Explain.",
                "line1 | line2 | line3 | line4",
                "line5 | line6 | line7 | line8",
                "line9",
            ]
        );
    }

    #[test]
    fn oversize_code_batch_is_broken_within_budget() {
        let f = formatter();
        let long = "z".repeat(300);
        let text = format!("CODE:{long}\n{long}");
        let chunks = f.format_split(&text);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert_eq!(chunk.kind, ChunkKind::Code);
            assert!(chunk.line().len() <= DEFAULT_MAX_LINE_LEN);
        }
    }

    #[test]
    fn prose_replies_lose_markdown() {
        let text = "Use `Vec::new()` like:\n```rust\nlet v = Vec::new();\n```";
        let chunks = formatter().format(text, FormatMode::Prose);
        assert_eq!(bodies(&chunks), vec!["Use Vec::new() like: let v = Vec::new();"]);
        assert!(chunks.iter().all(|c| !c.line().contains('`')));
    }

    #[test]
    fn format_dispatches_on_mode() {
        let f = formatter();
        let text = "A.CODE:b";
        assert_eq!(f.format(text, FormatMode::Prose).len(), 1);
        assert_eq!(f.format(text, FormatMode::Split).len(), 2);
    }
}
