//! Shared types used across modules
//!
//! Value types that flow between the extractor, the stage handlers and the
//! session, kept here to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// A question paired with the learner's (or generated) answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaItem {
    pub question: String,
    /// Empty until an answer is submitted
    #[serde(default)]
    pub answer: String,
}

impl QaItem {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// A generated question that has not been answered yet
    pub fn unanswered(question: impl Into<String>) -> Self {
        Self::new(question, String::new())
    }

    pub fn is_answered(&self) -> bool {
        !self.answer.trim().is_empty()
    }
}

/// One scored row of an evaluation rubric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub max_points: u32,
    pub awarded_points: u32,
    pub rationale: String,
}

/// Parsed evaluation of the learner's answers
///
/// `body` always holds the full markdown as generated; the structured
/// fields are best-effort and may be empty when the table is malformed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub total_score: Option<u32>,
    #[serde(default)]
    pub categories: Vec<CategoryScore>,
    pub body: String,
}

impl EvaluationReport {
    /// Sum of awarded points across parsed categories
    pub fn awarded_sum(&self) -> u32 {
        self.categories.iter().map(|c| c.awarded_points).sum()
    }

    /// Sum of available points across parsed categories
    pub fn max_sum(&self) -> u32 {
        self.categories.iter().map(|c| c.max_points).sum()
    }

    /// The stated total, or the category sum when the total line is absent
    pub fn effective_total(&self) -> Option<u32> {
        self.total_score.or_else(|| {
            if self.categories.is_empty() {
                None
            } else {
                Some(self.awarded_sum())
            }
        })
    }
}

/// Scoring rubric used by the evaluation stage, in table order
pub const EVALUATION_RUBRIC: &[(&str, u32)] = &[
    ("Accuracy Check", 30),
    ("Depth Analysis", 25),
    ("Completeness", 20),
    ("Conceptual Clarity", 15),
    ("Critical Analysis", 10),
];

/// Render answered Q&A the way generation prompts consume it
pub fn render_qna_for_prompt(items: &[QaItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("Q{}. {}\nAns: {}\n", i + 1, item.question, item.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render Q&A as a downloadable markdown document
pub fn render_qna_markdown(items: &[QaItem]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("### Q{}: {}\n", i + 1, item.question));
        out.push_str(&format!("**Answer:** {}\n\n", item.answer));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rubric_totals_100() {
        let total: u32 = EVALUATION_RUBRIC.iter().map(|(_, max)| max).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_render_qna_for_prompt() {
        let items = vec![
            QaItem::new("What is osmosis?", "Water moving across a membrane"),
            QaItem::unanswered("Why does it matter?"),
        ];
        let rendered = render_qna_for_prompt(&items);
        assert_eq!(
            rendered,
            "Q1. What is osmosis?\nAns: Water moving across a membrane\n\nQ2. Why does it matter?\nAns: \n"
        );
        assert!(!items[1].is_answered());
    }

    #[test]
    fn test_render_qna_markdown() {
        let md = render_qna_markdown(&[QaItem::new("A?", "B.")]);
        assert_eq!(md, "### Q1: A?\n**Answer:** B.\n\n");
    }

    #[test]
    fn test_effective_total_falls_back_to_sum() {
        let report = EvaluationReport {
            total_score: None,
            categories: vec![
                CategoryScore {
                    category: "Accuracy Check".into(),
                    max_points: 30,
                    awarded_points: 20,
                    rationale: String::new(),
                },
                CategoryScore {
                    category: "Completeness".into(),
                    max_points: 20,
                    awarded_points: 15,
                    rationale: String::new(),
                },
            ],
            body: String::new(),
        };
        assert_eq!(report.effective_total(), Some(35));
        assert_eq!(report.max_sum(), 50);
        assert_eq!(EvaluationReport::default().effective_total(), None);
    }
}
