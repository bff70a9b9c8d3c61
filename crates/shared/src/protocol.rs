use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{BookId, PageId, RequestId, RequestKind, RequestStatus, Symbol},
    error::PayloadError,
};

pub const GRID_SIZE: usize = 4;

pub type Grid = [[Symbol; GRID_SIZE]; GRID_SIZE];

pub const STEP_GRID_CALCULATED: &str = "grid_calculated";
pub const STEP_CONSONANTS_DERIVED: &str = "consonants_derived";
pub const STEP_PROPHECY_GENERATED: &str = "prophecy_generated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub query: String,
    pub turnstile_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prophecy {
    pub prophecy: String,
    pub prophecy_en: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridPayload {
    final_grid: Grid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsonantsPayload {
    consonants: Vec<String>,
}

/// Raw JSON body of one `data:` record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamRecord {
    /// Interprets the record. A top-level `error` wins over any step.
    /// Unknown steps yield `Ok(None)`.
    pub fn into_event(self) -> Result<Option<StreamEvent>, PayloadError> {
        if let Some(message) = self.error {
            return Ok(Some(StreamEvent::Error { message }));
        }
        let step = self.step.ok_or(PayloadError::MissingStep)?;
        let event = match step.as_str() {
            STEP_GRID_CALCULATED => {
                let payload: GridPayload = payload_of(&step, self.data)?;
                StreamEvent::GridCalculated {
                    grid: payload.final_grid,
                }
            }
            STEP_CONSONANTS_DERIVED => {
                let payload: ConsonantsPayload = payload_of(&step, self.data)?;
                StreamEvent::ConsonantsDerived {
                    consonants: payload.consonants,
                }
            }
            STEP_PROPHECY_GENERATED => StreamEvent::ProphecyGenerated(payload_of(&step, self.data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn payload_of<T: DeserializeOwned>(step: &str, data: Option<Value>) -> Result<T, PayloadError> {
    let data = data.ok_or_else(|| PayloadError::MissingData {
        step: step.to_string(),
    })?;
    serde_json::from_value(data).map_err(|source| PayloadError::InvalidData {
        step: step.to_string(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    GridCalculated { grid: Grid },
    ConsonantsDerived { consonants: Vec<String> },
    ProphecyGenerated(Prophecy),
    Error { message: String },
}

impl StreamEvent {
    pub fn step(&self) -> &'static str {
        match self {
            StreamEvent::GridCalculated { .. } => STEP_GRID_CALCULATED,
            StreamEvent::ConsonantsDerived { .. } => STEP_CONSONANTS_DERIVED,
            StreamEvent::ProphecyGenerated(_) => STEP_PROPHECY_GENERATED,
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn to_record(&self) -> StreamRecord {
        match self {
            StreamEvent::GridCalculated { grid } => StreamRecord {
                step: Some(STEP_GRID_CALCULATED.into()),
                data: Some(serde_json::json!({ "final_grid": grid })),
                error: None,
            },
            StreamEvent::ConsonantsDerived { consonants } => StreamRecord {
                step: Some(STEP_CONSONANTS_DERIVED.into()),
                data: Some(serde_json::json!({ "consonants": consonants })),
                error: None,
            },
            StreamEvent::ProphecyGenerated(prophecy) => StreamRecord {
                step: Some(STEP_PROPHECY_GENERATED.into()),
                data: serde_json::to_value(prophecy).ok(),
                error: None,
            },
            StreamEvent::Error { message } => StreamRecord {
                step: None,
                data: None,
                error: Some(message.clone()),
            },
        }
    }

    /// Wire form: `data: {json}\n\n`.
    pub fn frame(&self) -> String {
        let json = serde_json::to_string(&self.to_record()).unwrap_or_else(|_| "{}".into());
        format!("data: {json}\n\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    pub id: RequestId,
    pub book_id: BookId,
    pub page_id: PageId,
    pub username: String,
    #[serde(rename = "oldText")]
    pub old_text: String,
    #[serde(rename = "newText")]
    pub new_text: String,
    #[serde(rename = "requestType", default)]
    pub request_type: RequestKind,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(rename = "newText", default, skip_serializing_if = "Option::is_none")]
    pub new_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTextUpdate {
    #[serde(rename = "requestType")]
    pub request_type: RequestKind,
    #[serde(rename = "newText")]
    pub new_text: String,
}
