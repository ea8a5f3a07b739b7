use std::sync::Arc;

use lumen_host::{ChartHandle, HostPlatform};
use lumen_types::ChartSpec;

#[derive(Clone, Debug, PartialEq)]
pub enum RenderOutcome {
    Rendered(ChartHandle),
    Failed(String),
}

impl RenderOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, RenderOutcome::Rendered(_))
    }
}

/// Hands chart specs to the host for materialization and rendering.
pub struct VisualizationBridge {
    host: Arc<dyn HostPlatform>,
}

impl VisualizationBridge {
    pub fn new(host: Arc<dyn HostPlatform>) -> Self {
        Self { host }
    }

    /// Create the chart object, then show it in `target_id`.
    pub async fn render(&self, spec: &ChartSpec, target_id: &str) -> RenderOutcome {
        let handle = match self.host.create_visualization(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(chart_type = %spec.chart_type, error = %e, "chart creation failed");
                return RenderOutcome::Failed(e.message);
            }
        };

        match self.host.show_visualization(&handle, target_id).await {
            Ok(()) => {
                tracing::debug!(chart = %handle.0, target_id, "chart rendered");
                RenderOutcome::Rendered(handle)
            }
            Err(e) => {
                tracing::warn!(chart = %handle.0, target_id, error = %e, "chart render failed");
                RenderOutcome::Failed(e.message)
            }
        }
    }
}
