//! Prompt templates for every generative step
//!
//! Placeholders: `{document}`, `{transcript}`, `{gap_analysis}`, `{qna}`,
//! `{evaluation}`, `{count}`. Literal braces are doubled.

use crate::agent::generation::PromptTemplate;

pub const DOCUMENT_COMPRESSION: PromptTemplate = PromptTemplate::new_static(
    "document_compression",
    r#"You are preparing study notes for a learner. Rewrite the notes below so they are shorter but keep roughly 85-90% of the informational content.

Keep every definition, formula, theorem, numbered procedure, example and named entity. Condense repetition and long-winded explanations. Use headings, bullet points and tables where they make the material easier to scan. Never add facts that are not in the notes.

Return the result inside a single ```markdown fenced block.

Notes:
{document}
"#,
);

pub const GAP_ANALYSIS: PromptTemplate = PromptTemplate::new_static(
    "gap_analysis",
    r#"Compare a reference document with a learner's spoken explanation of the same topic.

Reference document:
{document}

Learner's explanation (transcribed speech):
{transcript}

Write a markdown report with these sections:
## Covered Well
## Missing Concepts
## Misconceptions
## Shallow Explanations
Each bullet must cite the part of the reference it relates to. Be specific and concise.
"#,
);

pub const QUESTION_GENERATION: PromptTemplate = PromptTemplate::new_static(
    "question_generation",
    r#"You are a tutor probing a learner's understanding.

Reference document:
{document}

Learner's explanation:
{transcript}

Gap analysis:
{gap_analysis}

Write exactly {count} open-ended questions that target the gaps and misconceptions above. Mix recall, explanation and application questions.

Output ONLY a list of strings, for example:
["Why does ...?", "Explain how ...", "Compare ..."]
"#,
);

pub const EVALUATION: PromptTemplate = PromptTemplate::new_static(
    "evaluation",
    r#"Grade a learner's answers against a reference document.

Reference document:
{document}

Learner's original explanation:
{transcript}

Gap analysis:
{gap_analysis}

Questions and answers:
{qna}

Score with this rubric (100 points total):
- Accuracy Check: 30
- Depth Analysis: 25
- Completeness: 20
- Conceptual Clarity: 15
- Critical Analysis: 10

Respond in markdown. Start with a line `Total Score: X/100`, then a table:
| Category | Max Points | Awarded | Rationale |
|---|---|---|---|
with one row per rubric category. Finish with per-question feedback and the three most important things to revise.
"#,
);

pub const NARRATION_TRANSCRIPT: PromptTemplate = PromptTemplate::new_static(
    "narration_transcript",
    r#"Write a spoken revision lesson for a learner, to be read aloud by a text-to-speech voice.

Evaluation:
{evaluation}

Learner's answers:
{qna}

Gap analysis:
{gap_analysis}

Reference document:
{document}

Learner's explanation:
{transcript}

Focus on what the learner got wrong or missed. Use plain sentences in short paragraphs separated by blank lines. No headings, bullet points, markdown, emoji or stage directions. Spell out symbols that would sound odd when spoken.
"#,
);

pub const SUMMARY_NOTES: PromptTemplate = PromptTemplate::new_static(
    "summary_notes",
    r#"Create concise revision notes for a learner.

Evaluation:
{evaluation}

Learner's answers:
{qna}

Gap analysis:
{gap_analysis}

Reference document:
{document}

Learner's explanation:
{transcript}

Organise the notes by topic with headings and bullets. Give the most space to the weak areas identified above. Return the notes inside a single ```markdown fenced block.
"#,
);

pub const KEY_VOCABULARY: PromptTemplate = PromptTemplate::new_static(
    "key_vocabulary",
    r#"List 10-15 key terms the learner needs for this topic, prioritising terms they misused or missed.

Evaluation:
{evaluation}

Learner's answers:
{qna}

Gap analysis:
{gap_analysis}

Reference document:
{document}

Learner's explanation:
{transcript}

Output ONLY a markdown list, one term per line, in the form:
- **Term**: one or two sentence definition
"#,
);

pub const SUPPLEMENTARY_QA: PromptTemplate = PromptTemplate::new_static(
    "supplementary_qa",
    r#"Write {count} practice questions with model answers that address the learner's gaps.

Evaluation:
{evaluation}

Learner's answers:
{qna}

Gap analysis:
{gap_analysis}

Reference document:
{document}

Learner's explanation:
{transcript}

Output ONLY a list of strings, each formatted as "Q: <question> | A: <answer>", for example:
["Q: What is ...? | A: It is ...", "Q: Why does ...? | A: Because ..."]
"#,
);
