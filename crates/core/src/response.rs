//! Scoring of structured QuestionnaireResponse documents

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::questionnaire::ITEM_WEIGHT_URL;

const NO_SECTION: &str = "No Section";

/// Score totals of a QuestionnaireResponse
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseScores {
    pub grand_total: f64,
    pub section_totals: BTreeMap<String, f64>,
}

/// Sum answer scores of a QuestionnaireResponse, grouped by section.
///
/// Returns `None` for any other document. Items with nested items are
/// sections; each leaf contributes the score of its answers (or of its own
/// value fields when it carries no `answer` list).
pub fn compute_scores(response: &JsonValue) -> Option<ResponseScores> {
    if response.get("resourceType").and_then(JsonValue::as_str) != Some("QuestionnaireResponse") {
        return None;
    }

    let mut scores = ResponseScores::default();
    if let Some(items) = response.get("item").and_then(JsonValue::as_array) {
        walk(items, None, &mut scores);
    }
    Some(scores)
}

fn walk(items: &[JsonValue], section: Option<&str>, scores: &mut ResponseScores) {
    for item in items {
        if let Some(children) = item.get("item").and_then(JsonValue::as_array) {
            let label = item.get("text").and_then(JsonValue::as_str).or(section);
            walk(children, label, scores);
            continue;
        }

        let score = match item.get("answer").and_then(JsonValue::as_array) {
            Some(answers) => answers.iter().map(value_score).sum::<f64>(),
            None => value_score(item),
        };
        scores.grand_total += score;
        *scores
            .section_totals
            .entry(section.unwrap_or(NO_SECTION).to_string())
            .or_insert(0.0) += score;
    }
}

/// itemWeight extension, else a numeric value field, else 0
fn value_score(value: &JsonValue) -> f64 {
    let weight = value
        .get("extension")
        .and_then(JsonValue::as_array)
        .and_then(|exts| {
            exts.iter().find(|ext| {
                ext.get("url").and_then(JsonValue::as_str) == Some(ITEM_WEIGHT_URL)
            })
        })
        .and_then(|ext| ext.get("valueDecimal"))
        .and_then(JsonValue::as_f64);
    if let Some(weight) = weight {
        return weight;
    }

    if let Some(n) = value.get("valueInteger").and_then(JsonValue::as_f64) {
        return n;
    }
    if let Some(n) = value.get("valueDecimal").and_then(JsonValue::as_f64) {
        return n;
    }
    value
        .get("valueString")
        .and_then(JsonValue::as_str)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}
