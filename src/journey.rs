//! Journey capture and the retrospective summary drawn from it.

use crate::completion::{ChatCompletion, CompletionRequest};
use crate::error::{GenerationError, PersistenceError};
use crate::history::NavigationRecord;
use crate::metrics::PricingTable;
use crate::pipeline::{self, GeneratedPage};
use crate::prompt;
use crate::store::{self, KeyValueStore, LAST_JOURNEY_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The records accumulated before a return home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedJourney {
    pub records: Vec<NavigationRecord>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedJourney {
    pub fn new(records: Vec<NavigationRecord>) -> Self {
        Self {
            records,
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn topics(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.topic.as_str()).collect()
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), PersistenceError> {
        store::save_json(store, LAST_JOURNEY_KEY, self)
    }

    /// The last captured journey; absent or unreadable state yields `None`.
    pub fn load_last(store: &dyn KeyValueStore) -> Option<Self> {
        store::load_json_or_warn(store, LAST_JOURNEY_KEY)
    }
}

/// Settings for a summary call. The summary is always requested without
/// streaming.
pub struct SummaryRequest<'a> {
    pub credential: Option<&'a str>,
    pub model: &'a str,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Build the retrospective for a journey. Only topic names are sent.
pub async fn summarize<C: ChatCompletion>(
    client: &C,
    journey: &[NavigationRecord],
    request: SummaryRequest<'_>,
    pricing: &PricingTable,
) -> Result<GeneratedPage, GenerationError> {
    let topics: Vec<&str> = journey.iter().map(|r| r.topic.as_str()).collect();
    tracing::info!("Summarizing journey of {} steps", topics.len());
    let completion = CompletionRequest {
        prompt: prompt::build_journey_prompt(&topics),
        model: request.model.to_string(),
        stream: false,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    };
    pipeline::generate(client, request.credential, &completion, pricing).await
}
