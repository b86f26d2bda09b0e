use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{AnswerValue, LeadCaptureSettings, LeadFieldType, ValidationIssue};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern compiles")
});

const FREE_EMAIL_PROVIDERS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "aol.com",
    "icloud.com",
    "mail.com",
    "protonmail.com",
    "yandex.com",
    "zoho.com",
    "gmx.com",
    "live.com",
    "msn.com",
];

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// False for addresses at well-known free mail providers.
pub fn is_business_email(email: &str) -> bool {
    let Some((_, domain)) = email.rsplit_once('@') else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    !FREE_EMAIL_PROVIDERS.contains(&domain.as_str())
}

/// Lead attributes attached to a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub hidden_data: BTreeMap<String, String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl LeadSubmission {
    pub fn has_contact(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
            || self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSubmission {
    pub quiz_id: Uuid,
    #[serde(default)]
    pub answers: BTreeMap<String, AnswerValue>,
    #[serde(default)]
    pub time_taken: Option<u32>,
    #[serde(default)]
    pub lead: Option<LeadSubmission>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub response_id: Uuid,
    pub lead_id: Option<Uuid>,
    /// False when an existing lead with the same email was reused.
    pub lead_created: bool,
}

/// Body of `POST /api/v1/responses`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<Uuid>,
}

impl SubmitResult {
    pub fn ok(receipt: SubmissionReceipt) -> Self {
        Self {
            success: true,
            error: None,
            response_id: Some(receipt.response_id),
            lead_id: receipt.lead_id,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            response_id: None,
            lead_id: None,
        }
    }
}

/// Persists a completed response. Implementations must make lead dedup
/// atomic per `(quiz, email)`.
pub trait SubmissionStore: Send + Sync {
    fn submit(
        &self,
        submission: ResponseSubmission,
    ) -> BoxFuture<'static, anyhow::Result<SubmissionReceipt>>;
}

fn form_text(form: &Map<String, Value>, key: &str) -> Option<String> {
    match form.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_filled(form: &Map<String, Value>, key: &str, field_type: LeadFieldType) -> bool {
    match field_type {
        LeadFieldType::Checkbox => matches!(form.get(key), Some(Value::Bool(true))),
        _ => form_text(form, key).is_some(),
    }
}

/// Validates the lead form and builds the lead to attach. Returns `Ok(None)`
/// when neither an email nor a phone number was given.
pub fn lead_from_form(
    settings: &LeadCaptureSettings,
    form: &Map<String, Value>,
    hidden_data: BTreeMap<String, String>,
    score: i64,
    outcome: &str,
) -> Result<Option<LeadSubmission>, Vec<ValidationIssue>> {
    let fields = settings.effective_fields();
    let mut issues = Vec::new();

    for field in &fields {
        if field.required && !is_filled(form, &field.id, field.field_type) {
            issues.push(ValidationIssue::new(&field.id, "is required"));
        }
    }

    let typed = |t: LeadFieldType, fallback: &str| {
        fields
            .iter()
            .filter(|f| f.field_type == t)
            .find_map(|f| form_text(form, &f.id))
            .or_else(|| form_text(form, fallback))
    };
    let email = typed(LeadFieldType::Email, "email");
    let phone = typed(LeadFieldType::Phone, "phone");
    let name = form_text(form, "name").or_else(|| form_text(form, "firstName"));

    if let Some(email) = &email {
        if !is_valid_email(email) {
            issues.push(ValidationIssue::new("email", "must be a valid email address"));
        } else if settings.require_business_email && !is_business_email(email) {
            issues.push(ValidationIssue::new("email", "must be a business email address"));
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    let lead = LeadSubmission {
        email,
        name,
        phone,
        metadata: form.clone(),
        hidden_data,
        score: Some(score),
        outcome: Some(outcome.to_string()),
    };
    Ok(lead.has_contact().then_some(lead))
}
