use async_trait::async_trait;
use lumen_types::{ChartSpec, FieldValue, ObjectSnapshot};
use thiserror::Error;

pub mod memory;
pub use memory::{Dataset, InMemoryHost};

#[derive(Debug, Error)]
#[error("host error: {message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Host-side identifier of a materialized chart object.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChartHandle(pub String);

/// The BI platform the chat widget is embedded in: field listing, field data,
/// the expression engine, dashboard objects and chart creation.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Names of all fields in the loaded data model.
    async fn list_fields(&self) -> Result<Vec<String>, HostError>;

    /// Full value sequence of one field, in host order.
    async fn field_values(&self, field: &str) -> Result<Vec<FieldValue>, HostError>;

    /// Evaluate an aggregate expression such as `Sum([Sales])`.
    async fn calculate_expression(&self, expression: &str) -> Result<f64, HostError>;

    /// First `max_rows` rows of a dashboard object's data.
    async fn object_data(
        &self,
        object_id: &str,
        max_rows: usize,
    ) -> Result<ObjectSnapshot, HostError>;

    /// Materialize a chart object from a spec.
    async fn create_visualization(&self, spec: &ChartSpec) -> Result<ChartHandle, HostError>;

    /// Render a previously created chart into a DOM target.
    async fn show_visualization(
        &self,
        chart: &ChartHandle,
        target_id: &str,
    ) -> Result<(), HostError>;
}

/// Host with no data model: it lists no fields and every other call fails.
pub struct NullHost;

#[async_trait]
impl HostPlatform for NullHost {
    async fn list_fields(&self) -> Result<Vec<String>, HostError> {
        Ok(Vec::new())
    }

    async fn field_values(&self, field: &str) -> Result<Vec<FieldValue>, HostError> {
        Err(HostError::new(format!("NullHost has no field '{field}'")))
    }

    async fn calculate_expression(&self, _expression: &str) -> Result<f64, HostError> {
        Err(HostError::new("NullHost has no expression engine"))
    }

    async fn object_data(
        &self,
        object_id: &str,
        _max_rows: usize,
    ) -> Result<ObjectSnapshot, HostError> {
        Err(HostError::new(format!("NullHost has no object '{object_id}'")))
    }

    async fn create_visualization(&self, _spec: &ChartSpec) -> Result<ChartHandle, HostError> {
        Err(HostError::new("NullHost cannot create charts"))
    }

    async fn show_visualization(
        &self,
        _chart: &ChartHandle,
        _target_id: &str,
    ) -> Result<(), HostError> {
        Err(HostError::new("NullHost cannot render charts"))
    }
}
