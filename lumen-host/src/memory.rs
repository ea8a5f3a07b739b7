use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lumen_types::{ChartSpec, FieldValue, ObjectSnapshot};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{ChartHandle, HostError, HostPlatform};

/// Data model served by [`InMemoryHost`].
///
/// Loaded from YAML (or JSON, which YAML accepts):
///
/// ```yaml
/// fields:
///   Region: [North, South]
///   Sales: [120.5, 80]
/// objects:
///   kpi-1:
///     headers: [Region, Sales]
///     rows: [[North, 120.5], [South, 80]]
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<FieldValue>>,
    #[serde(default)]
    pub objects: BTreeMap<String, ObjectSnapshot>,
}

impl Dataset {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            HostError::new(format!("reading {}: {e}", path.as_ref().display()))
        })?;
        serde_yaml::from_str(&text).map_err(|e| HostError::new(format!("dataset parse: {e}")))
    }

    pub fn with_field(mut self, name: impl Into<String>, values: Vec<FieldValue>) -> Self {
        self.fields.insert(name.into(), values);
        self
    }

    pub fn with_object(mut self, id: impl Into<String>, snapshot: ObjectSnapshot) -> Self {
        self.objects.insert(id.into(), snapshot);
        self
    }
}

/// Host platform backed by an in-memory dataset.
///
/// Evaluates `Sum`, `Avg`, `Min` and `Max` over a single field itself and
/// records every chart it is asked to show. Failures can be injected per
/// field, per object, or for listing and chart creation as a whole.
pub struct InMemoryHost {
    dataset: Dataset,
    failing_fields: HashSet<String>,
    failing_objects: HashSet<String>,
    fail_listing: bool,
    fail_charts: bool,
    fail_expressions: bool,
    expression_calls: AtomicUsize,
    next_chart: AtomicUsize,
    shown: Mutex<Vec<(ChartHandle, String)>>,
}

impl InMemoryHost {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            failing_fields: HashSet::new(),
            failing_objects: HashSet::new(),
            fail_listing: false,
            fail_charts: false,
            fail_expressions: false,
            expression_calls: AtomicUsize::new(0),
            next_chart: AtomicUsize::new(1),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HostError> {
        Ok(Self::new(Dataset::from_path(path)?))
    }

    /// Make data fetches for `field` fail.
    pub fn fail_field(mut self, field: impl Into<String>) -> Self {
        self.failing_fields.insert(field.into());
        self
    }

    pub fn fail_object(mut self, object_id: impl Into<String>) -> Self {
        self.failing_objects.insert(object_id.into());
        self
    }

    /// Make `list_fields` fail.
    pub fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn fail_charts(mut self) -> Self {
        self.fail_charts = true;
        self
    }

    pub fn fail_expressions(mut self) -> Self {
        self.fail_expressions = true;
        self
    }

    /// Number of expression evaluations requested so far.
    pub fn expression_calls(&self) -> usize {
        self.expression_calls.load(Ordering::SeqCst)
    }

    /// Charts shown so far, with the target they were rendered into.
    pub async fn shown(&self) -> Vec<(ChartHandle, String)> {
        self.shown.lock().await.clone()
    }

    fn numeric_values(&self, field: &str) -> Result<Vec<f64>, HostError> {
        let values = self
            .dataset
            .fields
            .get(field)
            .ok_or_else(|| HostError::new(format!("unknown field '{field}'")))?;
        let nums: Vec<f64> = values.iter().filter_map(as_number).collect();
        if nums.is_empty() {
            return Err(HostError::new(format!("field '{field}' has no numeric values")));
        }
        Ok(nums)
    }
}

fn as_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) => n.as_f64(),
        FieldValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Split `Func([Field])` or `Func(Field)` into its function and field name.
fn parse_aggregate(expression: &str) -> Option<(String, &str)> {
    let expression = expression.trim();
    let open = expression.find('(')?;
    let inner = expression[open + 1..].strip_suffix(')')?.trim();
    let field = inner
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(inner);
    Some((expression[..open].trim().to_ascii_lowercase(), field))
}

#[async_trait]
impl HostPlatform for InMemoryHost {
    async fn list_fields(&self) -> Result<Vec<String>, HostError> {
        if self.fail_listing {
            return Err(HostError::new("field listing unavailable"));
        }
        Ok(self.dataset.fields.keys().cloned().collect())
    }

    async fn field_values(&self, field: &str) -> Result<Vec<FieldValue>, HostError> {
        if self.failing_fields.contains(field) {
            return Err(HostError::new(format!("data fetch failed for '{field}'")));
        }
        self.dataset
            .fields
            .get(field)
            .cloned()
            .ok_or_else(|| HostError::new(format!("unknown field '{field}'")))
    }

    async fn calculate_expression(&self, expression: &str) -> Result<f64, HostError> {
        self.expression_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_expressions {
            return Err(HostError::new("expression engine unavailable"));
        }
        let (func, field) = parse_aggregate(expression)
            .ok_or_else(|| HostError::new(format!("unsupported expression '{expression}'")))?;
        let nums = self.numeric_values(field)?;
        let sum: f64 = nums.iter().sum();
        match func.as_str() {
            "sum" => Ok(sum),
            "avg" => Ok(sum / nums.len() as f64),
            "min" => Ok(nums.iter().copied().fold(f64::INFINITY, f64::min)),
            "max" => Ok(nums.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            other => Err(HostError::new(format!("unsupported function '{other}'"))),
        }
    }

    async fn object_data(
        &self,
        object_id: &str,
        max_rows: usize,
    ) -> Result<ObjectSnapshot, HostError> {
        if self.failing_objects.contains(object_id) {
            return Err(HostError::new(format!("object fetch failed for '{object_id}'")));
        }
        let object = self
            .dataset
            .objects
            .get(object_id)
            .ok_or_else(|| HostError::new(format!("unknown object '{object_id}'")))?;
        Ok(ObjectSnapshot {
            headers: object.headers.clone(),
            rows: object.rows.iter().take(max_rows).cloned().collect(),
        })
    }

    async fn create_visualization(&self, spec: &ChartSpec) -> Result<ChartHandle, HostError> {
        if self.fail_charts {
            return Err(HostError::new("chart creation unavailable"));
        }
        if let Some(dim) = spec
            .dimensions
            .iter()
            .find(|d| !self.dataset.fields.contains_key(d.as_str()))
        {
            return Err(HostError::new(format!("unknown dimension '{dim}'")));
        }
        let n = self.next_chart.fetch_add(1, Ordering::SeqCst);
        Ok(ChartHandle(format!("viz-{n}")))
    }

    async fn show_visualization(
        &self,
        chart: &ChartHandle,
        target_id: &str,
    ) -> Result<(), HostError> {
        tracing::debug!(chart = %chart.0, target_id, "showing chart");
        self.shown
            .lock()
            .await
            .push((chart.clone(), target_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host() -> InMemoryHost {
        InMemoryHost::new(
            Dataset::default()
                .with_field("Region", vec![json!("North"), json!("South")])
                .with_field("Sales", vec![json!(10), json!("30"), json!(20.0)]),
        )
    }

    #[tokio::test]
    async fn evaluates_aggregates_over_one_field() {
        let host = host();
        assert_eq!(host.calculate_expression("Sum([Sales])").await.unwrap(), 60.0);
        assert_eq!(host.calculate_expression("Avg(Sales)").await.unwrap(), 20.0);
        assert_eq!(host.calculate_expression("Min([Sales])").await.unwrap(), 10.0);
        assert_eq!(host.calculate_expression("MAX([Sales])").await.unwrap(), 30.0);
        assert!(host.calculate_expression("Sum([Region])").await.is_err());
        assert!(host.calculate_expression("Count([Sales])").await.is_err());
        assert_eq!(host.expression_calls(), 6);
    }

    #[tokio::test]
    async fn injected_failures_apply() {
        let host = host().fail_field("Sales").fail_charts().fail_listing();
        assert!(host.list_fields().await.is_err());
        assert!(host.field_values("Sales").await.is_err());
        assert!(host.field_values("Region").await.is_ok());
        let spec: ChartSpec = serde_json::from_value(json!({"type": "bar"})).unwrap();
        assert!(host.create_visualization(&spec).await.is_err());
    }

    #[tokio::test]
    async fn charts_with_unknown_dimensions_are_rejected() {
        let host = host();
        let ok: ChartSpec =
            serde_json::from_value(json!({"type": "bar", "dimensions": ["Region"]})).unwrap();
        let bad: ChartSpec =
            serde_json::from_value(json!({"type": "bar", "dimensions": ["Country"]})).unwrap();
        let handle = host.create_visualization(&ok).await.unwrap();
        host.show_visualization(&handle, "chart_1").await.unwrap();
        assert!(host.create_visualization(&bad).await.is_err());
        assert_eq!(host.shown().await, vec![(handle, "chart_1".to_string())]);
    }

    #[test]
    fn dataset_parses_from_yaml() {
        let ds: Dataset = serde_yaml::from_str(
            "fields:\n  Sales: [1, 2]\nobjects:\n  kpi:\n    headers: [a]\n    rows: [[1]]\n",
        )
        .unwrap();
        assert_eq!(ds.fields["Sales"].len(), 2);
        assert_eq!(ds.objects["kpi"].headers, vec!["a".to_string()]);
    }
}
