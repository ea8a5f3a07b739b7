use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single cell value as handed out by the host platform.
pub type FieldValue = serde_json::Value;

/// Inferred type of a dataset field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Numeric,
    Date,
    String,
}

/// A known dataset field with its cached sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    /// First values of the field, in host order. Bounded by the catalog's sample cap.
    pub sample: Vec<FieldValue>,
}

/// Aggregate statistics of a numeric field. Each statistic is fetched
/// independently, so any of them may be missing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FieldSummary {
    pub fn is_empty(&self) -> bool {
        self.sum.is_none() && self.avg.is_none() && self.min.is_none() && self.max.is_none()
    }
}

/// Per-field context handed to the model for one question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(rename = "sampleData")]
    pub sample: Vec<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<FieldSummary>,
}

/// Tabular snapshot of a dashboard object (hypercube page).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

/// Everything the model sees about the data for one question.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataContext {
    pub fields: BTreeMap<String, ContextEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub objects: BTreeMap<String, ObjectSnapshot>,
}

impl DataContext {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.objects.is_empty()
    }
}

/// Chart description extracted from a model reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub chart_type: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

/// A chart attached to a bot message, rendered into `target_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartRef {
    pub target_id: String,
    pub spec: ChartSpec,
}

/// One transcript entry. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartRef>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>, chart: Option<ChartRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            chart,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, None)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Role::Bot, text, None)
    }

    pub fn bot_with_chart(text: impl Into<String>, chart: ChartRef) -> Self {
        Self::new(Role::Bot, text, Some(chart))
    }
}
