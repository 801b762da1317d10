//! FHIR Questionnaire input and the flattened question model
//!
//! A questionnaire is a tree of groups, display items and answerable
//! questions. Interviews never walk the tree directly: it is flattened once
//! into an ordered list of [`Question`]s, with each item classified into an
//! [`ItemNode`] so later stages never re-inspect raw item shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;

use crate::error::IntakeError;

/// Extension URL carrying the numeric weight (score) of an answer option
pub const ITEM_WEIGHT_URL: &str = "http://hl7.org/fhir/StructureDefinition/itemWeight";

const UNTITLED: &str = "Untitled";

/// Leading phrases that already read as a yes/no question
const YES_NO_LEADS: &[&str] = &[
    "Have you",
    "In the past",
    "Over the past",
    "During the last",
    "Are you",
    "Do you",
    "Did you",
    "Has your",
    "Is your",
    "Was your",
];

/// FHIR Questionnaire resource (the subset the interview needs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
}

impl Questionnaire {
    /// Parse a questionnaire from raw JSON, rejecting other resource types
    pub fn from_json(value: JsonValue) -> Result<Self, IntakeError> {
        match value.get("resourceType").and_then(|v| v.as_str()) {
            Some("Questionnaire") => {}
            Some(other) => {
                return Err(IntakeError::InvalidQuestionnaire(format!(
                    "expected resourceType Questionnaire, got {other}"
                )));
            }
            None => {
                return Err(IntakeError::InvalidQuestionnaire(
                    "missing resourceType".to_string(),
                ));
            }
        }

        serde_json::from_value(value).map_err(|e| IntakeError::InvalidQuestionnaire(e.to_string()))
    }

    /// Title shown to the user and stored with session logs
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED)
    }

    /// Flatten the item tree into the questions of the given view
    pub fn questions(&self, view: QuestionView) -> Vec<Question> {
        flatten(&self.item, view)
    }
}

/// Questionnaire item type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "display")]
    Display,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "decimal")]
    Decimal,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "dateTime")]
    DateTime,
    #[serde(rename = "time")]
    Time,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "choice")]
    Choice,
    #[serde(rename = "open-choice")]
    OpenChoice,
    #[serde(rename = "attachment")]
    Attachment,
    #[serde(rename = "reference")]
    Reference,
    #[serde(rename = "quantity")]
    Quantity,
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl ItemType {
    /// FHIR code of the item type
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Group => "group",
            ItemType::Display => "display",
            ItemType::Boolean => "boolean",
            ItemType::Decimal => "decimal",
            ItemType::Integer => "integer",
            ItemType::Date => "date",
            ItemType::DateTime => "dateTime",
            ItemType::Time => "time",
            ItemType::String => "string",
            ItemType::Text => "text",
            ItemType::Url => "url",
            ItemType::Email => "email",
            ItemType::Choice => "choice",
            ItemType::OpenChoice => "open-choice",
            ItemType::Attachment => "attachment",
            ItemType::Reference => "reference",
            ItemType::Quantity => "quantity",
            ItemType::Unknown => "unknown",
        }
    }

    /// Hint appended to free-text prompts for types with a required format
    pub fn validation_hint(self) -> Option<&'static str> {
        match self {
            ItemType::Date => Some("The answer must be a valid date (YYYY-MM-DD)."),
            ItemType::Email => Some("The answer must be a valid email address."),
            _ => None,
        }
    }
}

/// A node of the questionnaire tree as delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireItem {
    #[serde(default)]
    pub link_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(rename = "type")]
    pub item_type: ItemType,

    /// Pre-rendered friendlier phrasing attached at import time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversational_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_option: Option<Vec<AnswerOptionSource>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
}

/// Classified view of a questionnaire item
#[derive(Debug, Clone)]
pub enum ItemNode<'a> {
    Group {
        label: Option<&'a str>,
        children: &'a [QuestionnaireItem],
    },
    Display,
    Choice {
        options: Option<Vec<AnswerOption>>,
    },
    FreeText {
        validation_hint: Option<&'static str>,
    },
}

impl QuestionnaireItem {
    /// Classify the item once, normalizing its answer options
    pub fn node(&self) -> ItemNode<'_> {
        match self.item_type {
            ItemType::Group => ItemNode::Group {
                label: self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()),
                children: &self.item,
            },
            ItemType::Display => ItemNode::Display,
            ItemType::Choice | ItemType::OpenChoice => ItemNode::Choice {
                options: self.answer_options(),
            },
            other => ItemNode::FreeText {
                validation_hint: other.validation_hint(),
            },
        }
    }

    /// Normalize the declared answer options.
    ///
    /// Returns `None` when the item carries no option list at all, which is
    /// distinct from a present but empty list.
    pub fn answer_options(&self) -> Option<Vec<AnswerOption>> {
        self.answer_option
            .as_ref()
            .map(|sources| sources.iter().map(AnswerOption::from_source).collect())
    }
}

/// Raw FHIR answerOption, in any of its supported encodings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOptionSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_coding: Option<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_integer: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

/// FHIR Coding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<AnswerCode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// FHIR extension (only decimal values are read)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_decimal: Option<f64>,
}

/// Weight carried by an itemWeight extension, if any
pub fn item_weight(extensions: &[Extension]) -> Option<f64> {
    extensions
        .iter()
        .find(|ext| ext.url == ITEM_WEIGHT_URL)
        .and_then(|ext| ext.value_decimal)
}

/// Answer option code: FHIR codes are strings, but integer options and
/// hand-written questionnaires use numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerCode {
    Integer(i64),
    Text(String),
}

impl AnswerCode {
    /// Numeric reading of the code, if it is a finite number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerCode::Integer(n) => Some(*n as f64),
            AnswerCode::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }
}

impl fmt::Display for AnswerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerCode::Integer(n) => write!(f, "{n}"),
            AnswerCode::Text(s) => f.write_str(s),
        }
    }
}

/// Normalized answer option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub code: AnswerCode,
    pub display: String,
    /// Explicit itemWeight, else the numeric code, else 0
    pub weight: f64,
}

impl AnswerOption {
    fn from_source(source: &AnswerOptionSource) -> Self {
        let (code, display) = if let Some(coding) = &source.value_coding {
            let code = coding
                .code
                .clone()
                .or_else(|| coding.display.clone().map(AnswerCode::Text))
                .unwrap_or_else(|| AnswerCode::Text(String::new()));
            let display = coding
                .display
                .clone()
                .or_else(|| coding.code.as_ref().map(|c| c.to_string()))
                .unwrap_or_default();
            (code, display)
        } else if let Some(n) = source.value_integer {
            (AnswerCode::Integer(n), n.to_string())
        } else if let Some(s) = &source.value_string {
            (AnswerCode::Text(s.clone()), s.clone())
        } else {
            (AnswerCode::Text(String::new()), String::new())
        };

        let weight = item_weight(&source.extension)
            .or_else(|| code.as_number())
            .unwrap_or(0.0);

        Self {
            code,
            display,
            weight,
        }
    }
}

/// Which questions a flattening pass keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionView {
    /// Closed-choice questions only, walked positionally in step mode
    Scored,
    /// Every answerable leaf; the LLM decides the order
    Answerable,
}

impl QuestionView {
    fn includes(self, item_type: ItemType) -> bool {
        match self {
            QuestionView::Scored => item_type == ItemType::Choice,
            QuestionView::Answerable => true,
        }
    }
}

/// Answer shape of a flattened question
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionKind {
    Choice { options: Option<Vec<AnswerOption>> },
    FreeText { validation_hint: Option<&'static str> },
}

/// One answerable question extracted from the questionnaire tree
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub link_id: String,
    pub text: String,
    pub conversational_text: Option<String>,
    pub item_type: ItemType,
    /// Label of the nearest enclosing group
    pub section: Option<String>,
    pub kind: QuestionKind,
}

impl Question {
    /// Declared answer options, `None` for free-text questions
    pub fn answer_options(&self) -> Option<&[AnswerOption]> {
        match &self.kind {
            QuestionKind::Choice {
                options: Some(options),
            } => Some(options),
            _ => None,
        }
    }

    /// A `choice` question with at least one declared option
    pub fn is_closed_choice(&self) -> bool {
        self.item_type == ItemType::Choice
            && self.answer_options().is_some_and(|opts| !opts.is_empty())
    }

    pub fn validation_hint(&self) -> Option<&'static str> {
        match self.kind {
            QuestionKind::FreeText { validation_hint } => validation_hint,
            QuestionKind::Choice { .. } => None,
        }
    }

    /// The phrasing the interviewer uses when asking this question
    pub fn prompt(&self) -> String {
        self.conversational_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| make_conversational(&self.text))
    }

    /// Look up an option by its code as text
    pub fn find_option(&self, code: &str) -> Option<&AnswerOption> {
        self.answer_options()?
            .iter()
            .find(|opt| opt.code.to_string() == code)
    }

    /// Score for a selected code.
    ///
    /// Uses the matching option's weight; unknown codes fall back to their
    /// numeric value, and anything unresolvable scores 0.
    pub fn answer_score(&self, selected: &str) -> f64 {
        if self.answer_options().is_none() {
            return 0.0;
        }
        match self.find_option(selected) {
            Some(opt) => opt.weight,
            None => AnswerCode::Text(selected.to_string())
                .as_number()
                .unwrap_or(0.0),
        }
    }

    fn from_item(item: &QuestionnaireItem, section: Option<&str>) -> Option<Self> {
        let kind = match item.node() {
            ItemNode::Choice { options } => QuestionKind::Choice { options },
            ItemNode::FreeText { validation_hint } => QuestionKind::FreeText { validation_hint },
            ItemNode::Group { .. } | ItemNode::Display => return None,
        };

        let text = item
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&item.link_id)
            .to_string();

        Some(Self {
            link_id: item.link_id.clone(),
            text,
            conversational_text: item.conversational_text.clone(),
            item_type: item.item_type,
            section: section.map(str::to_string),
            kind,
        })
    }
}

/// Flatten a questionnaire item tree into an ordered question list.
///
/// Groups are descended recursively and pass their label down as the
/// section; display items are dropped. Items without a linkId, or repeating
/// an earlier linkId, are skipped so answers stay keyed uniquely.
pub fn flatten(items: &[QuestionnaireItem], view: QuestionView) -> Vec<Question> {
    let mut questions = Vec::new();
    let mut seen = HashSet::new();
    collect(items, None, view, &mut seen, &mut questions);
    questions
}

fn collect(
    items: &[QuestionnaireItem],
    section: Option<&str>,
    view: QuestionView,
    seen: &mut HashSet<String>,
    out: &mut Vec<Question>,
) {
    for item in items {
        match item.node() {
            ItemNode::Group { label, children } => {
                collect(children, label.or(section), view, seen, out);
            }
            ItemNode::Display => {}
            _ if !view.includes(item.item_type) => {}
            _ => {
                if item.link_id.trim().is_empty() {
                    tracing::warn!(text = ?item.text, "Skipping question without linkId");
                    continue;
                }
                if !seen.insert(item.link_id.clone()) {
                    tracing::warn!(link_id = %item.link_id, "Skipping duplicate linkId");
                    continue;
                }
                if let Some(question) = Question::from_item(item, section) {
                    out.push(question);
                }
            }
        }
    }
}

/// Rewrite literal question text into a question-mark-terminated prompt
pub fn make_conversational(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with(['.', '?', '!']) {
        return trimmed.to_string();
    }
    if YES_NO_LEADS.iter().any(|lead| starts_with_ignore_case(trimmed, lead)) {
        return format!("{trimmed}?");
    }

    let mut chars = trimmed.chars();
    let lowered: String = match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("Have you been {lowered}?")
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
