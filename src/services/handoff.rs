//! Condensed summaries passed between parts of a multi-part run.
//!
//! Later parts see the problem statement plus the headings and opening
//! sentences of earlier parts instead of the full conversation, which keeps
//! prompt size bounded as the report grows.

use crate::domain::models::PartNumber;
use crate::domain::ports::TierPromptConfig;

const MAX_PROBLEM_CHARS: usize = 2_000;
const MAX_POINTS_PER_PART: usize = 10;
const MAX_PART_SUMMARY_CHARS: usize = 1_200;

/// Truncate on a char boundary, appending an ellipsis when shortened.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

fn first_sentence(paragraph: &str) -> &str {
    let end = paragraph
        .char_indices()
        .find(|(i, c)| {
            matches!(c, '.' | '!' | '?')
                && paragraph[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8());
    end.map_or(paragraph, |end| &paragraph[..end])
}

/// Key points of one part: headings and the first sentence of each paragraph.
pub fn key_points(content: &str) -> Vec<String> {
    let mut points = Vec::new();
    let mut at_paragraph_start = true;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            at_paragraph_start = true;
            continue;
        }
        if trimmed.starts_with('#') {
            points.push(trimmed.trim_start_matches('#').trim().to_string());
            at_paragraph_start = true;
            continue;
        }
        if at_paragraph_start {
            let body = trimmed.trim_start_matches(['-', '*', '>']).trim();
            if !body.is_empty() {
                points.push(first_sentence(body).to_string());
            }
        }
        at_paragraph_start = false;

        if points.len() >= MAX_POINTS_PER_PART {
            break;
        }
    }
    points.truncate(MAX_POINTS_PER_PART);
    points
}

/// Build the handoff state for the next part.
pub fn build_handoff_state(
    problem_statement: &str,
    completed: &[(PartNumber, &str)],
    prompts: &TierPromptConfig,
) -> String {
    let mut out = format!(
        "Problem statement:\n{}\n\nSummary of completed parts:\n",
        truncate(problem_statement.trim(), MAX_PROBLEM_CHARS)
    );

    for (part, content) in completed {
        let points = key_points(content)
            .into_iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        out.push_str(&format!(
            "\n### Part {}: {}\n{}\n",
            part,
            prompts.part_title(*part),
            truncate(&points, MAX_PART_SUMMARY_CHARS)
        ));
    }
    out
}
