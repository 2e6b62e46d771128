//! Structured-output recovery
//!
//! Generation backends return loosely structured text. The functions here
//! pull string lists, Q/A pairs, fenced markdown bodies and score tables
//! out of that text. None of them return an error: the worst case is an
//! empty or default value, and malformed individual entries are dropped.
//!
//! List recovery never evaluates anything. The bracketed span is read by a
//! small literal scanner that accepts only a flat list of quoted strings.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::types::{CategoryScore, EvaluationReport, QaItem};

/// Widest `[` ... `]` span, across newlines
static LIST_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[.*\]").expect("list span regex"));

/// Fenced markdown block, closing fence optional
static MARKDOWN_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:markdown|md)[ \t]*\r?\n(.*?)(?:\r?\n[ \t]*```|```|\z)")
        .expect("markdown fence regex")
});

static TOTAL_SCORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)total\s+score\s*\**\s*:?\s*\**\s*(\d{1,3})\s*/\s*100")
        .expect("total score regex")
});

static LEADING_INT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)").expect("integer regex"));

static QUESTION_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:q(?:uestion)?\s*\d*\s*[:.)])\s*").expect("question label regex"));

static ANSWER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:a(?:ns(?:wer)?)?\s*[:.)])\s*").expect("answer label regex"));

/// Characters outside this class are unspeakable noise for narration
static UNSPEAKABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[^a-zA-Z0-9\s()+\-,.?!$%&'"]"#).expect("speech filter regex")
});

/// Recover a list of strings from generative text.
///
/// Locates the widest bracketed span and parses it as a literal list of
/// quoted strings. Any failure yields an empty list.
pub fn extract_string_list(text: &str) -> Vec<String> {
    let Some(span) = LIST_SPAN.find(text) else {
        debug!("No bracketed list found in {} chars of output", text.len());
        return Vec::new();
    };

    match parse_literal_list(span.as_str()) {
        Some(items) => items,
        None => {
            debug!("Bracketed span is not a literal string list");
            Vec::new()
        }
    }
}

/// Recover Q/A pairs from a literal list of `"Q: ... | A: ..."` strings.
///
/// Entries that do not split into a question and an answer are dropped,
/// so the result can be shorter than what was asked for.
pub fn extract_qa_pairs(text: &str) -> Vec<QaItem> {
    extract_string_list(text)
        .iter()
        .filter_map(|item| split_qa(item))
        .collect()
}

/// Split one entry once on the first `|`, stripping `Q:`/`A:` labels.
pub fn split_qa(item: &str) -> Option<QaItem> {
    let (question, answer) = item.split_once('|')?;
    let question = QUESTION_LABEL.replace(question.trim(), "").trim().to_string();
    let answer = ANSWER_LABEL.replace(answer.trim(), "").trim().to_string();
    if question.is_empty() {
        return None;
    }
    Some(QaItem::new(question, answer))
}

/// Body of the first ```` ```markdown ```` block, up to its closing fence
/// or to the end of the text when the output was truncated.
pub fn extract_markdown_body(text: &str) -> Option<String> {
    MARKDOWN_FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Fenced body when present, otherwise the trimmed raw text
pub fn markdown_or_raw(text: &str) -> String {
    extract_markdown_body(text).unwrap_or_else(|| text.trim().to_string())
}

/// `Total Score: X/100`, if stated
pub fn extract_total_score(text: &str) -> Option<u32> {
    TOTAL_SCORE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A pipe table found in markdown text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkdownTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// First pipe table in the text. Separator rows are skipped; the first
/// remaining row becomes the header.
pub fn extract_markdown_table(text: &str) -> Option<MarkdownTable> {
    let mut table_lines = Vec::new();
    let mut in_table = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('|') {
            in_table = true;
            table_lines.push(trimmed);
        } else if in_table {
            break;
        }
    }

    let mut cells = table_lines
        .into_iter()
        .filter(|line| !is_separator_row(line))
        .map(split_row);

    let header = cells.next()?;
    Some(MarkdownTable {
        header,
        rows: cells.collect(),
    })
}

fn is_separator_row(line: &str) -> bool {
    line.chars()
        .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

fn split_row(line: &str) -> Vec<String> {
    let inner = line.trim().trim_start_matches('|').trim_end_matches('|');
    inner
        .split('|')
        .map(|cell| cell.trim().trim_matches('*').trim().to_string())
        .collect()
}

/// Parse an evaluation report from its markdown.
///
/// Table rows are read as `category | max | awarded | rationale`. Rows
/// whose numeric cells do not parse, and summary rows such as "Total",
/// are skipped.
pub fn parse_evaluation(text: &str) -> EvaluationReport {
    let categories = extract_markdown_table(text)
        .map(|table| {
            table
                .rows
                .iter()
                .filter_map(|row| parse_score_row(row))
                .collect()
        })
        .unwrap_or_default();

    EvaluationReport {
        total_score: extract_total_score(text),
        categories,
        body: text.trim().to_string(),
    }
}

fn parse_score_row(row: &[String]) -> Option<CategoryScore> {
    if row.len() < 3 {
        return None;
    }
    let category = row[0].clone();
    if category.is_empty() || category.eq_ignore_ascii_case("total") {
        return None;
    }
    let max_points = leading_int(&row[1])?;
    let awarded_points = leading_int(&row[2])?;
    let rationale = row.get(3..).map(|rest| rest.join(" | ")).unwrap_or_default();
    Some(CategoryScore {
        category,
        max_points,
        awarded_points,
        rationale,
    })
}

fn leading_int(cell: &str) -> Option<u32> {
    LEADING_INT
        .captures(cell)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Rewrite `- term: definition` lines as `- **term**: definition`.
///
/// Only applied when the text contains no bold markup at all; blank lines
/// are dropped in that case and other lines are kept as they are.
pub fn format_vocabulary(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.contains("**") {
        return trimmed.to_string();
    }

    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let stripped = line.trim();
            match stripped.strip_prefix("- ").and_then(|rest| rest.split_once(':')) {
                Some((term, definition)) => {
                    format!("- **{}**: {}", term.trim(), definition.trim())
                }
                None => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove characters a speech synthesizer would read out as noise
/// (markdown emphasis, headings, bullets, emoji).
pub fn sanitize_for_speech(text: &str) -> String {
    UNSPEAKABLE.replace_all(text, "").trim().to_string()
}

/// Parse a flat literal list of quoted strings: `["a", 'b', ...]`.
///
/// Supports single and double quotes, backslash escapes and a trailing
/// comma. Anything else (numbers, nesting, bare words) rejects the list.
pub fn parse_literal_list(input: &str) -> Option<Vec<String>> {
    let mut chars = input.trim().chars().peekable();
    if chars.next()? != '[' {
        return None;
    }

    let mut items = Vec::new();
    loop {
        skip_whitespace(&mut chars);
        match chars.next()? {
            ']' => break,
            quote @ ('"' | '\'') => {
                items.push(read_quoted(&mut chars, quote)?);
                skip_whitespace(&mut chars);
                match chars.next()? {
                    ',' => continue,
                    ']' => break,
                    _ => return None,
                }
            }
            _ => return None,
        }
    }

    skip_whitespace(&mut chars);
    if chars.next().is_some() {
        return None;
    }
    Some(items)
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) -> Option<String> {
    let mut out = String::new();
    loop {
        match chars.next()? {
            c if c == quote => return Some(out),
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                'u' => {
                    let hex: String = (0..4).filter_map(|_| chars.next()).collect();
                    let code = u32::from_str_radix(&hex, 16).ok()?;
                    out.push(char::from_u32(code)?);
                }
                '\n' => {}
                other => out.push(other),
            },
            // Unterminated string on this line: not a literal
            '\n' => return None,
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_double_quotes() {
        let text = r#"Here you go:
["What is a cell?", "Why do cells divide?"]
Hope this helps."#;
        assert_eq!(
            extract_string_list(text),
            vec!["What is a cell?", "Why do cells divide?"]
        );
    }

    #[test]
    fn test_string_list_mixed_quotes_and_escapes() {
        let text = r#"['It\'s alive', "say \"hi\"", 'tab\there',]"#;
        assert_eq!(
            extract_string_list(text),
            vec!["It's alive", "say \"hi\"", "tab\there"]
        );
    }

    #[test]
    fn test_string_list_spans_lines() {
        let text = "[\n  \"one\",\n  \"two\"\n]";
        assert_eq!(extract_string_list(text), vec!["one", "two"]);
    }

    #[test]
    fn test_string_list_rejects_non_literals() {
        assert!(extract_string_list("no list here").is_empty());
        assert!(extract_string_list("[1, 2, 3]").is_empty());
        assert!(extract_string_list("[\"ok\", __import__('os')]").is_empty());
        assert!(extract_string_list("[\"unterminated]").is_empty());
        assert!(extract_string_list("[\"a\" \"b\"]").is_empty());
    }

    #[test]
    fn test_greedy_span_breaks_on_trailing_brackets() {
        // The widest span swallows the trailing note, so the parse fails.
        let text = r#"["a", "b"] see [note]"#;
        assert!(extract_string_list(text).is_empty());
    }

    #[test]
    fn test_empty_list() {
        assert!(extract_string_list("[]").is_empty());
        assert_eq!(parse_literal_list("[ ]"), Some(vec![]));
    }

    #[test]
    fn test_qa_pairs_drop_malformed() {
        let text = r#"["Q: Why? | A: Because.", "bad-item"]"#;
        let pairs = extract_qa_pairs(text);
        assert_eq!(pairs, vec![QaItem::new("Why?", "Because.")]);
    }

    #[test]
    fn test_qa_split_once_on_first_pipe() {
        let item = split_qa("Q: Pick one | A: left | right").unwrap();
        assert_eq!(item.question, "Pick one");
        assert_eq!(item.answer, "left | right");
    }

    #[test]
    fn test_qa_labels_optional() {
        let item = split_qa("What is DNA?|Genetic material").unwrap();
        assert_eq!(item, QaItem::new("What is DNA?", "Genetic material"));
        let item = split_qa("Question 3: How? | Answer: Like so").unwrap();
        assert_eq!(item, QaItem::new("How?", "Like so"));
    }

    #[test]
    fn test_qa_empty_question_dropped() {
        assert!(split_qa(" | A: orphan").is_none());
    }

    #[test]
    fn test_markdown_body_closed_fence() {
        let text = "Sure!\n```markdown\n# Title\n\nBody\n```\nDone";
        assert_eq!(extract_markdown_body(text).unwrap(), "# Title\n\nBody");
    }

    #[test]
    fn test_markdown_body_truncated() {
        let text = "```markdown\n## Notes\n- point one\n- point tw";
        assert_eq!(
            extract_markdown_body(text).unwrap(),
            "## Notes\n- point one\n- point tw"
        );
    }

    #[test]
    fn test_markdown_or_raw_fallback() {
        assert_eq!(markdown_or_raw("  plain text \n"), "plain text");
        assert_eq!(markdown_or_raw("```md\nx\n```"), "x");
    }

    #[test]
    fn test_total_score() {
        assert_eq!(extract_total_score("**Total Score: 72/100**"), Some(72));
        assert_eq!(extract_total_score("Total score - none"), None);
        assert_eq!(extract_total_score("## Total Score : 100 / 100"), Some(100));
    }

    #[test]
    fn test_parse_evaluation_table() {
        let text = "\
# Evaluation

**Total Score: 61/100**

| Category | Max Points | Awarded | Rationale |
|---|---|---|---|
| **Accuracy Check** | 30 | 20 | Mostly correct |
| Depth Analysis | 25 | 15 pts | Shallow in places |
| Completeness | 20 | 12 | Missed osmosis |
| Conceptual Clarity | 15 | 9 | OK |
| Critical Analysis | 10 | 5 | Limited |
| Total | 100 | 61 | |

Closing remarks.";
        let report = parse_evaluation(text);
        assert_eq!(report.total_score, Some(61));
        assert_eq!(report.categories.len(), 5);
        assert_eq!(report.categories[0].category, "Accuracy Check");
        assert_eq!(report.categories[1].awarded_points, 15);
        assert_eq!(report.categories[2].rationale, "Missed osmosis");
        assert_eq!(report.awarded_sum(), 61);
        assert!(report.body.starts_with("# Evaluation"));
    }

    #[test]
    fn test_parse_evaluation_without_table() {
        let report = parse_evaluation("The learner did fine.");
        assert_eq!(report.total_score, None);
        assert!(report.categories.is_empty());
        assert_eq!(report.body, "The learner did fine.");
    }

    #[test]
    fn test_format_vocabulary_adds_bold() {
        let text = "- Mitosis: Cell division\n\n- Osmosis: Water movement\nNot a term";
        assert_eq!(
            format_vocabulary(text),
            "- **Mitosis**: Cell division\n- **Osmosis**: Water movement\nNot a term"
        );
    }

    #[test]
    fn test_format_vocabulary_keeps_bold_output() {
        let text = "- **Mitosis**: Cell division\n";
        assert_eq!(format_vocabulary(text), "- **Mitosis**: Cell division");
    }

    #[test]
    fn test_sanitize_for_speech() {
        let text = "## Welcome! 🎉 Let's *review* cells (quickly) - 100% ready?";
        assert_eq!(
            sanitize_for_speech(text),
            "Welcome!  Let's review cells (quickly) - 100% ready?"
        );
    }
}
