use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join4;
use lumen_host::HostPlatform;
use lumen_types::{Field, FieldSummary, FieldType};
use tokio::sync::Mutex;

/// Aggregate functions requested from the host expression engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn expression(self, field: &str) -> String {
        let func = match self {
            Aggregate::Sum => "Sum",
            Aggregate::Avg => "Avg",
            Aggregate::Min => "Min",
            Aggregate::Max => "Max",
        };
        format!("{func}([{field}])")
    }
}

/// Computes sum/avg/min/max for numeric fields through the host.
pub struct SummaryProvider {
    host: Arc<dyn HostPlatform>,
    cache: Option<Mutex<HashMap<String, FieldSummary>>>,
}

impl SummaryProvider {
    pub fn new(host: Arc<dyn HostPlatform>) -> Self {
        Self {
            host,
            cache: Some(Mutex::new(HashMap::new())),
        }
    }

    /// Provider that asks the host again on every call.
    pub fn uncached(host: Arc<dyn HostPlatform>) -> Self {
        Self { host, cache: None }
    }

    /// Summary of a numeric field, or `None` for date/string fields.
    ///
    /// The four aggregates are independent requests; a failed one leaves its
    /// statistic out. If all four fail the summary is `None`.
    pub async fn summarize(&self, field: &Field) -> Option<FieldSummary> {
        if field.field_type != FieldType::Numeric {
            return None;
        }

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().await.get(&field.name) {
                return Some(hit.clone());
            }
        }

        let (sum, avg, min, max) = join4(
            self.aggregate(Aggregate::Sum, &field.name),
            self.aggregate(Aggregate::Avg, &field.name),
            self.aggregate(Aggregate::Min, &field.name),
            self.aggregate(Aggregate::Max, &field.name),
        )
        .await;
        let summary = FieldSummary { sum, avg, min, max };
        if summary.is_empty() {
            return None;
        }

        if let Some(cache) = &self.cache {
            cache
                .lock()
                .await
                .insert(field.name.clone(), summary.clone());
        }
        Some(summary)
    }

    /// Drop cached summaries so the next call recomputes them.
    pub async fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().await.clear();
        }
    }

    async fn aggregate(&self, agg: Aggregate, field: &str) -> Option<f64> {
        let expression = agg.expression(field);
        match self.host.calculate_expression(&expression).await {
            Ok(v) if v.is_finite() => Some(v),
            Ok(v) => {
                tracing::warn!(%expression, value = v, "aggregate is not finite");
                None
            }
            Err(e) => {
                tracing::warn!(%expression, error = %e, "aggregate request failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lumen_host::{ChartHandle, Dataset, HostError, InMemoryHost};
    use lumen_types::{ChartSpec, FieldValue, ObjectSnapshot};
    use serde_json::json;

    fn field(name: &str, field_type: FieldType) -> Field {
        Field {
            name: name.into(),
            field_type,
            sample: Vec::new(),
        }
    }

    #[test]
    fn expressions_bracket_field_names() {
        assert_eq!(Aggregate::Sum.expression("Unit Price"), "Sum([Unit Price])");
        assert_eq!(Aggregate::Max.expression("Sales"), "Max([Sales])");
    }

    #[tokio::test]
    async fn string_field_makes_no_host_calls() {
        let host = Arc::new(InMemoryHost::new(
            Dataset::default().with_field("Region", vec![json!("North")]),
        ));
        let provider = SummaryProvider::new(host.clone());
        assert!(provider
            .summarize(&field("Region", FieldType::String))
            .await
            .is_none());
        assert!(provider
            .summarize(&field("When", FieldType::Date))
            .await
            .is_none());
        assert_eq!(host.expression_calls(), 0);
    }

    #[tokio::test]
    async fn numeric_summary_is_cached() {
        let host = Arc::new(InMemoryHost::new(
            Dataset::default().with_field("Sales", vec![json!(10), json!(30)]),
        ));
        let provider = SummaryProvider::new(host.clone());
        let sales = field("Sales", FieldType::Numeric);

        let summary = provider.summarize(&sales).await.unwrap();
        assert_eq!(summary.sum, Some(40.0));
        assert_eq!(summary.avg, Some(20.0));
        assert_eq!(summary.min, Some(10.0));
        assert_eq!(summary.max, Some(30.0));

        provider.summarize(&sales).await.unwrap();
        assert_eq!(host.expression_calls(), 4);

        provider.invalidate().await;
        provider.summarize(&sales).await.unwrap();
        assert_eq!(host.expression_calls(), 8);
    }

    #[tokio::test]
    async fn all_aggregates_failing_yields_none() {
        let host = Arc::new(
            InMemoryHost::new(Dataset::default().with_field("Sales", vec![json!(1)]))
                .fail_expressions(),
        );
        let provider = SummaryProvider::uncached(host.clone());
        assert!(provider
            .summarize(&field("Sales", FieldType::Numeric))
            .await
            .is_none());
        assert_eq!(host.expression_calls(), 4);
    }

    /// Expression engine that only knows how to sum.
    struct SumOnlyHost;

    #[async_trait]
    impl HostPlatform for SumOnlyHost {
        async fn list_fields(&self) -> Result<Vec<String>, HostError> {
            Ok(Vec::new())
        }
        async fn field_values(&self, _field: &str) -> Result<Vec<FieldValue>, HostError> {
            Ok(Vec::new())
        }
        async fn calculate_expression(&self, expression: &str) -> Result<f64, HostError> {
            if expression.starts_with("Sum(") {
                Ok(42.0)
            } else {
                Err(HostError::new("unsupported"))
            }
        }
        async fn object_data(&self, _id: &str, _rows: usize) -> Result<ObjectSnapshot, HostError> {
            Err(HostError::new("unsupported"))
        }
        async fn create_visualization(&self, _spec: &ChartSpec) -> Result<ChartHandle, HostError> {
            Err(HostError::new("unsupported"))
        }
        async fn show_visualization(&self, _c: &ChartHandle, _t: &str) -> Result<(), HostError> {
            Err(HostError::new("unsupported"))
        }
    }

    #[tokio::test]
    async fn partial_failures_keep_remaining_statistics() {
        let provider = SummaryProvider::uncached(Arc::new(SumOnlyHost));
        let summary = provider
            .summarize(&field("Sales", FieldType::Numeric))
            .await
            .unwrap();
        assert_eq!(summary.sum, Some(42.0));
        assert!(summary.avg.is_none() && summary.min.is_none() && summary.max.is_none());
    }
}
