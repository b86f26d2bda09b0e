//! Capture of lead attributes that come from the visitor's environment rather
//! than from the lead form.

use axum_extra::extract::cookie::Cookie;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HiddenSource {
    UrlParam,
    Referrer,
    UserAgent,
    Cookie,
    Constant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HiddenField {
    pub id: String,
    pub name: String,
    pub source_type: HiddenSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant_value: Option<String>,
}

impl HiddenField {
    /// Save-time sanity check for a descriptor.
    pub fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        let key_missing = self
            .source_key
            .as_deref()
            .map(|k| k.trim().is_empty())
            .unwrap_or(true);
        match self.source_type {
            HiddenSource::UrlParam | HiddenSource::Cookie if key_missing => {
                Err("sourceKey is required for url_param and cookie sources".into())
            }
            HiddenSource::Constant if self.constant_value.is_none() => {
                Err("constantValue is required for constant sources".into())
            }
            _ => Ok(()),
        }
    }
}

/// Environmental sources visible when the visitor takes the quiz.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureContext {
    /// Page URL, absolute or path-relative (`/quiz/x?utm_source=...`).
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Raw `Cookie` header value.
    pub cookies: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CaptureError {
    #[error("no page url available")]
    NoUrl,
    #[error("page url is malformed: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("cookie header is malformed: {0}")]
    BadCookie(String),
    #[error("descriptor has no source key")]
    NoKey,
}

pub const USER_AGENT_KEY: &str = "userAgent";

impl CaptureContext {
    fn page_url(&self) -> Result<Url, CaptureError> {
        let raw = self.url.as_deref().ok_or(CaptureError::NoUrl)?;
        match Url::parse(raw) {
            Ok(u) => Ok(u),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse("http://localhost/")?;
                Ok(base.join(raw)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn query_param(&self, key: &str) -> Result<Option<String>, CaptureError> {
        let url = self.page_url()?;
        Ok(url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned()))
    }

    fn cookie(&self, name: &str) -> Result<Option<String>, CaptureError> {
        let Some(raw) = self.cookies.as_deref() else {
            return Ok(None);
        };
        for parsed in Cookie::split_parse(raw) {
            let cookie = parsed.map_err(|e| CaptureError::BadCookie(e.to_string()))?;
            if cookie.name() == name {
                return Ok(Some(cookie.value().to_string()));
            }
        }
        Ok(None)
    }
}

fn resolve(field: &HiddenField, ctx: &CaptureContext) -> Result<Option<String>, CaptureError> {
    let key = || field.source_key.as_deref().ok_or(CaptureError::NoKey);
    match field.source_type {
        HiddenSource::UrlParam => ctx.query_param(key()?),
        HiddenSource::Referrer => Ok(ctx.referrer.clone()),
        HiddenSource::UserAgent => Ok(ctx.user_agent.clone()),
        HiddenSource::Cookie => ctx.cookie(key()?),
        HiddenSource::Constant => Ok(field.constant_value.clone()),
    }
}

/// Resolve every descriptor; a field that fails to resolve is left out without
/// affecting the others. With no descriptors, falls back to `utm_*` and `ref`
/// query parameters plus the user agent.
pub fn capture(fields: &[HiddenField], ctx: &CaptureContext) -> BTreeMap<String, String> {
    if fields.is_empty() {
        return legacy_capture(ctx);
    }
    let mut data = BTreeMap::new();
    for field in fields {
        match resolve(field, ctx) {
            Ok(Some(value)) => {
                data.insert(field.name.clone(), value);
            }
            Ok(None) => {}
            Err(err) => debug!("hidden field {} not captured: {}", field.name, err),
        }
    }
    data
}

fn legacy_capture(ctx: &CaptureContext) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    match ctx.page_url() {
        Ok(url) => {
            for (k, v) in url.query_pairs() {
                if k.starts_with("utm_") || k == "ref" {
                    data.insert(k.into_owned(), v.into_owned());
                }
            }
        }
        Err(CaptureError::NoUrl) => {}
        Err(err) => debug!("query parameters not captured: {}", err),
    }
    if let Some(ua) = &ctx.user_agent {
        data.insert(USER_AGENT_KEY.to_string(), ua.clone());
    }
    data
}
