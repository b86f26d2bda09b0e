use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::hidden_fields::HiddenField;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    SingleChoice,
    MultiSelect,
    TrueFalse,
    YesNo,
    Rating,
    Scale,
    Text,
    Content,
    Testimonial,
    Product,
}

impl QuestionType {
    /// Types answered by picking exactly one option.
    pub fn is_single_answer(self) -> bool {
        matches!(
            self,
            QuestionType::MultipleChoice
                | QuestionType::SingleChoice
                | QuestionType::TrueFalse
                | QuestionType::YesNo
                | QuestionType::Rating
                | QuestionType::Scale
        )
    }

    /// Types that only present information and continue on a button press.
    pub fn is_informational(self) -> bool {
        matches!(
            self,
            QuestionType::Content | QuestionType::Testimonial | QuestionType::Product
        )
    }

    /// Text and multi-select always need an explicit submit, whatever the button text.
    pub fn always_requires_submit(self) -> bool {
        matches!(self, QuestionType::Text | QuestionType::MultiSelect)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_position: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionElement {
    pub id: String,
    pub visible: bool,
    pub location: String,
    pub order: u32,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<Uuid>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
    #[serde(rename = "type")]
    pub q_type: QuestionType,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub options: Vec<AnswerOption>,
    #[serde(default = "yes")]
    pub is_required: bool,
    #[serde(default)]
    pub allow_back: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structure: Vec<QuestionElement>,
    #[serde(default = "yes")]
    pub is_active: bool,
}

impl Question {
    pub fn has_button(&self) -> bool {
        self.button_text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn option(&self, value: &str) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.value == value)
    }
}

/// A recorded answer: one token for single-valued types, the ordered
/// selection for multi-select.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AnswerValue {
    Single(String),
    Multiple(Vec<String>),
}

impl AnswerValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            AnswerValue::Single(v) => vec![v.as_str()],
            AnswerValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

fn default_range_max() -> i64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThankYouPage {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<Uuid>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub score_range_min: i64,
    #[serde(default = "default_range_max")]
    pub score_range_max: i64,
}

impl ThankYouPage {
    pub fn contains(&self, score: i64) -> bool {
        self.score_range_min <= score && score <= self.score_range_max
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadFieldType {
    Email,
    Text,
    Phone,
    Checkbox,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeadField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: LeadFieldType,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl LeadField {
    /// Form shown when a quiz configures no fields of its own.
    pub fn default_form() -> Vec<LeadField> {
        vec![
            LeadField {
                id: "firstName".into(),
                field_type: LeadFieldType::Text,
                label: "First Name".into(),
                required: false,
                placeholder: Some("Jane".into()),
            },
            LeadField {
                id: "email".into(),
                field_type: LeadFieldType::Email,
                label: "Email Address".into(),
                required: true,
                placeholder: Some("jane@example.com".into()),
            },
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    #[serde(default = "yes")]
    pub show_progress_bar: bool,
    /// Off: option clicks on single-answer questions only select, and the
    /// submit button records the answer.
    #[serde(default = "yes")]
    pub auto_advance: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            show_progress_bar: true,
            auto_advance: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeadCaptureSettings {
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub fields: Vec<LeadField>,
    #[serde(default)]
    pub hidden_fields: Vec<HiddenField>,
    #[serde(default)]
    pub require_business_email: bool,
}

impl Default for LeadCaptureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fields: Vec::new(),
            hidden_fields: Vec::new(),
            require_business_email: false,
        }
    }
}

impl LeadCaptureSettings {
    pub fn effective_fields(&self) -> Vec<LeadField> {
        if self.fields.is_empty() {
            LeadField::default_form()
        } else {
            self.fields.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizSettings {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub lead_capture: LeadCaptureSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<Value>,
    #[serde(default)]
    pub settings: QuizSettings,
    pub is_active: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub thank_you_pages: Vec<ThankYouPage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    /// Active questions in presentation order.
    pub fn runnable_questions(&self) -> Vec<Question> {
        let mut questions: Vec<Question> = self
            .questions
            .iter()
            .filter(|q| q.is_active)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.order);
        questions
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub quiz_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub hidden_data: BTreeMap<String, String>,
    pub score: Option<i64>,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub answers: BTreeMap<String, AnswerValue>,
    pub time_taken: Option<u32>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AbTestStatus {
    #[default]
    Draft,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: Uuid,
    pub test_id: Uuid,
    pub quiz_id: Uuid,
    pub traffic_percentage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AbTest {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: AbTestStatus,
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Hubspot,
    FacebookPixel,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: Uuid,
    pub quiz_id: Uuid,
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    pub config: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

pub fn validate_quiz(quiz: &Quiz) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if quiz.title.trim().is_empty() {
        issues.push(ValidationIssue::new("title", "must not be empty"));
    }
    if !is_valid_slug(&quiz.slug) {
        issues.push(ValidationIssue::new(
            "slug",
            "must be non-empty lowercase letters, digits, '-' or '_'",
        ));
    }

    let mut question_ids = HashSet::new();
    for (i, q) in quiz.questions.iter().enumerate() {
        if q.id.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("questions[{i}].id"), "must not be empty"));
        }
        if !question_ids.insert(q.id.clone()) {
            issues.push(ValidationIssue::new(format!("questions[{i}].id"), "must be unique"));
        }
        if q.text.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("questions[{i}].text"), "must not be empty"));
        }

        let needs_options = q.q_type.is_single_answer() || q.q_type == QuestionType::MultiSelect;
        if needs_options && q.options.is_empty() {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].options"),
                "is required for choice questions",
            ));
        }
        if q.q_type == QuestionType::Text && !q.options.is_empty() {
            issues.push(ValidationIssue::new(
                format!("questions[{i}].options"),
                "must be absent for text question",
            ));
        }
        let mut values = HashSet::new();
        for (j, opt) in q.options.iter().enumerate() {
            if opt.value.trim().is_empty() || opt.label.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("questions[{i}].options[{j}]"),
                    "value/label must not be empty",
                ));
            }
            if !values.insert(opt.value.clone()) {
                issues.push(ValidationIssue::new(
                    format!("questions[{i}].options[{j}].value"),
                    "must be unique",
                ));
            }
        }
    }

    for (i, page) in quiz.thank_you_pages.iter().enumerate() {
        if page.title.trim().is_empty() {
            issues.push(ValidationIssue::new(
                format!("thankYouPages[{i}].title"),
                "must not be empty",
            ));
        }
        if page.score_range_min > page.score_range_max {
            issues.push(ValidationIssue::new(
                format!("thankYouPages[{i}].scoreRangeMin"),
                "must not exceed scoreRangeMax",
            ));
        }
    }

    let mut field_ids = HashSet::new();
    for (i, field) in quiz.settings.lead_capture.fields.iter().enumerate() {
        if !field_ids.insert(field.id.clone()) {
            issues.push(ValidationIssue::new(
                format!("settings.leadCapture.fields[{i}].id"),
                "must be unique",
            ));
        }
    }
    for (i, hidden) in quiz.settings.lead_capture.hidden_fields.iter().enumerate() {
        if let Err(issue) = hidden.check() {
            issues.push(ValidationIssue::new(
                format!("settings.leadCapture.hiddenFields[{i}]"),
                issue,
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// The splitter tolerates any percentages; the sum rule only applies to tests
/// that are about to receive traffic.
pub fn validate_ab_test(test: &AbTest) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if test.name.trim().is_empty() {
        issues.push(ValidationIssue::new("name", "must not be empty"));
    }
    if !is_valid_slug(&test.slug) {
        issues.push(ValidationIssue::new(
            "slug",
            "must be non-empty lowercase letters, digits, '-' or '_'",
        ));
    }
    for (i, v) in test.variants.iter().enumerate() {
        if v.traffic_percentage > 100 {
            issues.push(ValidationIssue::new(
                format!("variants[{i}].trafficPercentage"),
                "must be between 0 and 100",
            ));
        }
    }
    if test.status == AbTestStatus::Active {
        if test.variants.is_empty() {
            issues.push(ValidationIssue::new("variants", "active test needs at least one variant"));
        }
        let total: u32 = test.variants.iter().map(|v| v.traffic_percentage).sum();
        if total != 100 {
            issues.push(ValidationIssue::new(
                "variants",
                format!("traffic must sum to 100 for an active test (got {total})"),
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
