//! Funnel events and the sinks they are dispatched to.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{IntegrationKind, Lead};
use crate::state::InMemoryDb;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    View,
    Start,
    Answer,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    pub quiz_id: Uuid,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Metadata key linking a `complete` event to the lead it produced.
pub const LEAD_ID_KEY: &str = "leadId";

impl TrackingEvent {
    /// Drops the lead reference so the event cannot pull lead contact data
    /// into conversion reports.
    pub fn without_lead_reference(mut self) -> Self {
        if let Some(Value::Object(meta)) = self.metadata.as_mut() {
            meta.remove(LEAD_ID_KEY);
        }
        self
    }
}

/// A stored tracking event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Receives funnel events. Callers never wait on or retry a sink, so a
/// failure only costs the event.
pub trait ConversionSink: Send + Sync {
    fn track(&self, event: &TrackingEvent) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Keeps every event in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TrackingEvent>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<TrackingEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ConversionSink for MemorySink {
    fn track(&self, event: &TrackingEvent) -> BoxFuture<'static, anyhow::Result<()>> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Box::pin(async { Ok(()) })
    }
}

/// Records events into the interactions table that funnel analytics read.
pub struct InteractionLog {
    db: Arc<InMemoryDb>,
}

impl InteractionLog {
    pub fn new(db: Arc<InMemoryDb>) -> Self {
        Self { db }
    }
}

impl ConversionSink for InteractionLog {
    fn track(&self, event: &TrackingEvent) -> BoxFuture<'static, anyhow::Result<()>> {
        // Inserted before the future is returned so the write does not depend
        // on the caller polling it.
        let id = Uuid::new_v4();
        self.db.interactions.insert(
            id,
            Interaction {
                id,
                quiz_id: event.quiz_id,
                session_id: event.session_id.clone(),
                kind: event.kind,
                metadata: event.metadata.clone(),
                created_at: Utc::now(),
            },
        );
        Box::pin(async { Ok(()) })
    }
}

/// Forwards each event to every inner sink and reports the first failure.
pub struct FanOutSink {
    sinks: Vec<Arc<dyn ConversionSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Arc<dyn ConversionSink>>) -> Self {
        Self { sinks }
    }
}

impl ConversionSink for FanOutSink {
    fn track(&self, event: &TrackingEvent) -> BoxFuture<'static, anyhow::Result<()>> {
        let pending: Vec<_> = self.sinks.iter().map(|s| s.track(event)).collect();
        Box::pin(async move {
            let results = futures::future::join_all(pending).await;
            results.into_iter().collect::<anyhow::Result<Vec<()>>>()?;
            Ok(())
        })
    }
}

pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.trim().to_lowercase().as_bytes()))
}

/// Reports completed quizzes to the Facebook Conversions API for every
/// active `facebook_pixel` integration of the quiz.
pub struct FacebookCapiSink {
    db: Arc<InMemoryDb>,
    http: reqwest::Client,
    graph_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PixelConfig {
    pixel_id: String,
    access_token: String,
    #[serde(default)]
    test_event_code: Option<String>,
}

impl FacebookCapiSink {
    pub fn new(db: Arc<InMemoryDb>, http: reqwest::Client, graph_url: impl Into<String>) -> Self {
        Self {
            db,
            http,
            graph_url: graph_url.into(),
        }
    }
}

/// CAPI `data` entry for a completed quiz.
pub fn capi_event(event: &TrackingEvent, lead: Option<&Lead>, event_time: i64) -> Value {
    let mut user_data = serde_json::Map::new();
    if let Some(lead) = lead {
        if let Some(email) = &lead.email {
            user_data.insert("em".into(), json!([sha256_hex(email)]));
        }
        if let Some(phone) = &lead.phone {
            user_data.insert("ph".into(), json!([sha256_hex(phone)]));
        }
        if let Some(ua) = lead.hidden_data.get(crate::hidden_fields::USER_AGENT_KEY) {
            user_data.insert("client_user_agent".into(), json!(ua));
        }
    }
    let metadata = event.metadata.clone().unwrap_or(Value::Null);
    json!({
        "event_name": "Lead",
        "event_time": event_time,
        "event_id": event.session_id,
        "action_source": "website",
        "user_data": user_data,
        "custom_data": {
            "score": metadata.get("score").cloned().unwrap_or(Value::Null),
            "outcome": metadata.get("outcome").cloned().unwrap_or(Value::Null),
        },
    })
}

impl ConversionSink for FacebookCapiSink {
    fn track(&self, event: &TrackingEvent) -> BoxFuture<'static, anyhow::Result<()>> {
        let db = self.db.clone();
        let http = self.http.clone();
        let graph_url = self.graph_url.trim_end_matches('/').to_string();
        let event = event.clone();

        Box::pin(async move {
            if event.kind != InteractionType::Complete {
                return Ok(());
            }
            let pixels: Vec<PixelConfig> = db
                .integrations
                .read()
                .await
                .values()
                .filter(|i| {
                    i.quiz_id == event.quiz_id
                        && i.is_active
                        && i.kind == IntegrationKind::FacebookPixel
                })
                .filter_map(|i| match serde_json::from_value(i.config.clone()) {
                    Ok(cfg) => Some(cfg),
                    Err(err) => {
                        debug!("facebook pixel integration {} misconfigured: {}", i.id, err);
                        None
                    }
                })
                .collect();
            if pixels.is_empty() {
                return Ok(());
            }

            let lead_id = event
                .metadata
                .as_ref()
                .and_then(|m| m.get(LEAD_ID_KEY))
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok());
            let lead = match lead_id {
                Some(id) => db
                    .leads
                    .read()
                    .await
                    .get(&id)
                    .filter(|l| l.quiz_id == event.quiz_id)
                    .cloned(),
                None => None,
            };
            let data = capi_event(&event, lead.as_ref(), Utc::now().timestamp());

            for pixel in pixels {
                let mut body = json!({ "data": [data.clone()] });
                if let Some(code) = &pixel.test_event_code {
                    body["test_event_code"] = json!(code);
                }
                let url = format!("{}/{}/events", graph_url, pixel.pixel_id);
                let resp = http
                    .post(&url)
                    .query(&[("access_token", pixel.access_token.as_str())])
                    .json(&body)
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    anyhow::bail!("facebook capi returned {}: {}", status, text);
                }
                info!("sent conversion for quiz {} to pixel {}", event.quiz_id, pixel.pixel_id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct FailingSink;

    impl ConversionSink for FailingSink {
        fn track(&self, _event: &TrackingEvent) -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(async { anyhow::bail!("sink offline") })
        }
    }

    fn event(kind: InteractionType, metadata: Option<Value>) -> TrackingEvent {
        TrackingEvent {
            quiz_id: Uuid::new_v4(),
            session_id: "s-1".into(),
            kind,
            metadata,
        }
    }

    #[test]
    fn event_wire_shape() {
        let raw = serde_json::to_value(event(InteractionType::Complete, Some(json!({"score": 3})))).unwrap();
        assert_eq!(raw["type"], "complete");
        assert_eq!(raw["sessionId"], "s-1");
        assert_eq!(raw["metadata"]["score"], 3);
        let parsed: TrackingEvent = serde_json::from_value(json!({
            "quizId": Uuid::nil(),
            "sessionId": "abc",
            "type": "view"
        }))
        .unwrap();
        assert_eq!(parsed.kind, InteractionType::View);
        assert!(parsed.metadata.is_none());
    }

    #[tokio::test]
    async fn fan_out_reaches_every_sink_even_when_one_fails() {
        let memory = MemorySink::default();
        let fan = FanOutSink::new(vec![Arc::new(FailingSink), Arc::new(memory.clone())]);
        let result = fan.track(&event(InteractionType::View, None)).await;
        assert!(result.is_err());
        assert_eq!(memory.events().len(), 1);
    }

    #[tokio::test]
    async fn interaction_log_writes_synchronously() {
        let db = Arc::new(InMemoryDb::new(None));
        let log = InteractionLog::new(db.clone());
        let _pending = log.track(&event(InteractionType::Start, None));
        assert_eq!(db.interactions.len(), 1);
    }

    #[test]
    fn client_events_lose_their_lead_reference() {
        let lead_id = Uuid::new_v4();
        let stripped = event(
            InteractionType::Complete,
            Some(json!({"score": 3, "leadId": lead_id})),
        )
        .without_lead_reference();
        let meta = stripped.metadata.unwrap();
        assert!(meta.get(LEAD_ID_KEY).is_none());
        assert_eq!(meta["score"], 3);
        assert!(event(InteractionType::View, None).without_lead_reference().metadata.is_none());
    }

    #[test]
    fn hashes_are_normalized() {
        assert_eq!(sha256_hex(" Jane@Acme.io "), sha256_hex("jane@acme.io"));
        assert_eq!(sha256_hex("a").len(), 64);
    }

    #[test]
    fn capi_payload_hashes_contact_and_carries_score() {
        let mut hidden = BTreeMap::new();
        hidden.insert("userAgent".to_string(), "Mozilla/5.0".to_string());
        let lead = Lead {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            email: Some("jane@acme.io".into()),
            name: None,
            phone: Some("+15551234".into()),
            country: None,
            metadata: Default::default(),
            hidden_data: hidden,
            score: Some(7),
            outcome: Some("High".into()),
            created_at: Utc::now(),
        };
        let e = event(InteractionType::Complete, Some(json!({"score": 7, "outcome": "High"})));
        let data = capi_event(&e, Some(&lead), 1_700_000_000);
        assert_eq!(data["action_source"], "website");
        assert_eq!(data["event_time"], 1_700_000_000);
        assert_eq!(data["user_data"]["em"][0], sha256_hex("jane@acme.io"));
        assert_eq!(data["user_data"]["client_user_agent"], "Mozilla/5.0");
        assert_eq!(data["custom_data"]["score"], 7);
        assert_eq!(data["custom_data"]["outcome"], "High");
    }

    #[tokio::test]
    async fn capi_ignores_non_complete_and_unconfigured_quizzes() {
        let db = Arc::new(InMemoryDb::new(None));
        let sink = FacebookCapiSink::new(db, reqwest::Client::new(), "http://127.0.0.1:9");
        assert!(sink.track(&event(InteractionType::View, None)).await.is_ok());
        assert!(sink
            .track(&event(InteractionType::Complete, Some(json!({"score": 1}))))
            .await
            .is_ok());
    }
}
