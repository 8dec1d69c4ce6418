//! Deterministic, human-readable change summaries.
//!
//! Built only from the score delta and the high-severity finding categories
//! present in the analysis `findings` array (`{"category", "severity"}`
//! objects). No model is involved, so the same inputs always give the same
//! sentence.

use std::collections::BTreeSet;

const HIGH_SEVERITIES: [&str; 2] = ["high", "critical"];

/// Categories of findings with `high` or `critical` severity.
pub fn high_severity_categories(analysis: &serde_json::Value) -> BTreeSet<String> {
    analysis
        .get("findings")
        .and_then(|f| f.as_array())
        .into_iter()
        .flatten()
        .filter(|finding| {
            finding
                .get("severity")
                .and_then(|s| s.as_str())
                .is_some_and(|s| HIGH_SEVERITIES.contains(&s.to_ascii_lowercase().as_str()))
        })
        .filter_map(|finding| finding.get("category").and_then(|c| c.as_str()))
        .map(str::to_string)
        .collect()
}

fn score_sentence(previous: i32, current: i32) -> String {
    let delta = current - previous;
    if delta == 0 {
        return format!("Score unchanged at {current}.");
    }
    let direction = if delta > 0 { "rose" } else { "dropped" };
    let magnitude = match delta.abs() {
        0..=4 => " slightly",
        5..=19 => "",
        _ => " sharply",
    };
    format!(
        "Score{magnitude} {direction} by {} ({previous} -> {current}).",
        delta.abs()
    )
}

fn join(categories: &BTreeSet<&String>) -> String {
    categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One-paragraph summary of a change between two analyses.
pub fn change_summary(
    previous_score: i32,
    previous_analysis: &serde_json::Value,
    current_score: i32,
    current_analysis: &serde_json::Value,
    text_changed: bool,
) -> String {
    let mut parts = Vec::new();
    if text_changed {
        parts.push("Policy text changed.".to_string());
    }
    parts.push(score_sentence(previous_score, current_score));

    let before = high_severity_categories(previous_analysis);
    let after = high_severity_categories(current_analysis);
    let added: BTreeSet<&String> = after.difference(&before).collect();
    let removed: BTreeSet<&String> = before.difference(&after).collect();

    if !added.is_empty() {
        parts.push(format!("New high-severity concerns: {}.", join(&added)));
    }
    if !removed.is_empty() {
        parts.push(format!("Resolved high-severity concerns: {}.", join(&removed)));
    }

    parts.join(" ")
}
