use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{DetailExtractorError, GeocoderError};

/// Opaque geocoding capability. Implementations live in `providers`;
/// workers never know which one they're holding.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str, deadline: Duration)
        -> Result<(f64, f64), GeocoderError>;
    fn name(&self) -> &'static str;
}

/// Context handed to the extractor alongside the page text so it can anchor
/// on the right event.
#[derive(Debug, Clone, Default)]
pub struct ExtractHints {
    pub event_name: String,
    pub location: Option<String>,
    pub date_start: Option<chrono::NaiveDate>,
}

/// What the LLM returns for one event page. Field names double as the
/// recognized `event_details` keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedDetails {
    /// Driving directions to camp, verbatim where possible.
    #[serde(default)]
    pub directions: Option<String>,
    /// Camp amenities (water, corrals, hookups, meals...).
    #[serde(default)]
    pub amenities: Vec<String>,
    /// Trail hazards and cautions.
    #[serde(default)]
    pub hazards: Vec<String>,
    /// Named veterinarians/control staff from the page.
    #[serde(default)]
    pub veterinarians: Vec<String>,
    #[serde(default)]
    pub entry_fees: Option<String>,
    #[serde(default)]
    pub awards: Option<String>,
    #[serde(default)]
    pub camping: Option<String>,
}

impl ExtractedDetails {
    pub fn is_empty(&self) -> bool {
        self.directions.is_none()
            && self.amenities.is_empty()
            && self.hazards.is_empty()
            && self.veterinarians.is_empty()
            && self.entry_fees.is_none()
            && self.awards.is_none()
            && self.camping.is_none()
    }

    /// Convert to an `event_details` patch, skipping empty fields so the
    /// merge never clobbers stored values with blanks.
    pub fn to_patch(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut patch = serde_json::Map::new();
        if let Some(directions) = &self.directions {
            patch.insert("directions".to_string(), serde_json::json!(directions));
        }
        if !self.amenities.is_empty() {
            patch.insert("amenities".to_string(), serde_json::json!(self.amenities));
        }
        if !self.hazards.is_empty() {
            patch.insert("hazards".to_string(), serde_json::json!(self.hazards));
        }
        if !self.veterinarians.is_empty() {
            patch.insert(
                "veterinarians".to_string(),
                serde_json::json!(self.veterinarians),
            );
        }
        if let Some(fees) = &self.entry_fees {
            patch.insert("entry_fees".to_string(), serde_json::json!(fees));
        }
        if let Some(awards) = &self.awards {
            patch.insert("awards".to_string(), serde_json::json!(awards));
        }
        if let Some(camping) = &self.camping {
            patch.insert("camping".to_string(), serde_json::json!(camping));
        }
        patch
    }
}

/// Opaque detail-extraction capability (the LLM boundary).
#[async_trait]
pub trait DetailExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        hints: &ExtractHints,
    ) -> Result<ExtractedDetails, DetailExtractorError>;
}
