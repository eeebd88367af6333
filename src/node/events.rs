//! Events pushed by the coordinator feed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const KNOWN_TAGS: [&str; 3] = ["job_created", "job_retry", "job_completed"];

/// A tagged feed event this node reacts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    JobCreated(JobAnnouncement),
    /// Same payload as `JobCreated`; only newly elected nodes are listed.
    JobRetry(JobAnnouncement),
    JobCompleted(JobCompletion),
}

impl FeedEvent {
    pub fn coordinator_id(&self) -> &str {
        match self {
            FeedEvent::JobCreated(a) | FeedEvent::JobRetry(a) => &a.coordinator_id,
            FeedEvent::JobCompleted(c) => &c.coordinator_id,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            FeedEvent::JobCreated(a) | FeedEvent::JobRetry(a) => &a.job_id,
            FeedEvent::JobCompleted(c) => &c.job_id,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FeedEvent::JobCreated(_) => "job_created",
            FeedEvent::JobRetry(_) => "job_retry",
            FeedEvent::JobCompleted(_) => "job_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAnnouncement {
    pub coordinator_id: String,
    /// Nodes elected to run the job.
    #[serde(default)]
    pub node_ids: Vec<String>,
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub coordinator_id: String,
    pub job_id: String,
    #[serde(default)]
    pub node_ids: Vec<String>,
    #[serde(default, alias = "reward_recipients")]
    pub payout_node_ids: Vec<String>,
    #[serde(default)]
    pub payout_strategy: Option<Value>,
    #[serde(default)]
    pub outcome: Option<Value>,
}

/// Decodes one feed frame.
///
/// The tagged record may arrive bare, as a JSON-encoded string under
/// `event`, or as an object under `event`. Unknown tags yield `Ok(None)`.
pub fn parse_message(raw: &str) -> Result<Option<FeedEvent>, serde_json::Error> {
    let message: Value = serde_json::from_str(raw)?;
    let record = match message.get("event").cloned() {
        Some(Value::String(encoded)) if encoded.trim_start().starts_with('{') => {
            serde_json::from_str(&encoded)?
        }
        Some(Value::String(_)) => message,
        Some(nested @ Value::Object(_)) => nested,
        _ => return Ok(None),
    };

    let known = record
        .get("event")
        .and_then(Value::as_str)
        .is_some_and(|tag| KNOWN_TAGS.contains(&tag));
    if !known {
        tracing::debug!(event = ?record.get("event"), "Ignoring unknown feed event");
        return Ok(None);
    }
    serde_json::from_value(record).map(Some)
}
