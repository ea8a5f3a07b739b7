use std::sync::Arc;

use futures_util::future::join_all;
use lumen_catalog::{FieldCatalog, SummaryProvider};
use lumen_host::HostPlatform;
use lumen_types::{ContextEntry, DataContext, Field, FieldValue};
use serde::Deserialize;

/// Sample values sent to the model per field.
pub const SAMPLE_LIMIT: usize = 10;
/// Rows sent to the model per dashboard object.
pub const OBJECT_ROW_LIMIT: usize = 10;

/// How field names are recognized in a question.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The field name must appear verbatim.
    #[default]
    Exact,
    CaseInsensitive,
}

/// True if `name` occurs in `question` as a whole word (or word sequence).
pub fn mentions(question: &str, name: &str, mode: MatchMode) -> bool {
    if name.is_empty() {
        return false;
    }
    let (haystack, needle) = match mode {
        MatchMode::Exact => (question.to_string(), name.to_string()),
        MatchMode::CaseInsensitive => (question.to_lowercase(), name.to_lowercase()),
    };

    // candidates may overlap, so resume one char past each rejected start
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle.as_str()) {
        let start = from + offset;
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        if !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric) {
            return true;
        }
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// Assembles the per-question data context from the catalog and the host.
pub struct ContextBuilder {
    catalog: Arc<FieldCatalog>,
    host: Arc<dyn HostPlatform>,
    summaries: Arc<SummaryProvider>,
    match_mode: MatchMode,
    object_ids: Vec<String>,
}

impl ContextBuilder {
    pub fn new(
        catalog: Arc<FieldCatalog>,
        host: Arc<dyn HostPlatform>,
        summaries: Arc<SummaryProvider>,
    ) -> Self {
        Self {
            catalog,
            host,
            summaries,
            match_mode: MatchMode::Exact,
            object_ids: Vec::new(),
        }
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    /// Dashboard objects whose data is attached to every question.
    pub fn with_objects(mut self, object_ids: Vec<String>) -> Self {
        self.object_ids = object_ids;
        self
    }

    /// Catalog fields named in the question.
    pub fn matched_fields(&self, question: &str) -> Vec<&Field> {
        self.catalog
            .fields()
            .filter(|f| mentions(question, &f.name, self.match_mode))
            .collect()
    }

    /// Build the context for one question. Never fails: fields and objects
    /// that cannot be fetched are left out.
    pub async fn build(&self, question: &str) -> DataContext {
        let matched = self.matched_fields(question);
        tracing::debug!(
            matched = ?matched.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            "fields matched in question"
        );

        let entries = join_all(matched.into_iter().map(|field| async move {
            let sample = self.sample(field).await;
            let summary = self.summaries.summarize(field).await;
            (
                field.name.clone(),
                ContextEntry {
                    field_type: field.field_type,
                    sample,
                    summary,
                },
            )
        }))
        .await;

        let objects = join_all(self.object_ids.iter().map(|id| async move {
            match self.host.object_data(id, OBJECT_ROW_LIMIT).await {
                Ok(snapshot) => Some((id.clone(), snapshot)),
                Err(e) => {
                    tracing::warn!(object_id = %id, error = %e, "object data fetch failed; skipping");
                    None
                }
            }
        }))
        .await;

        DataContext {
            fields: entries.into_iter().collect(),
            objects: objects.into_iter().flatten().collect(),
        }
    }

    async fn sample(&self, field: &Field) -> Vec<FieldValue> {
        match self.host.field_values(&field.name).await {
            Ok(values) => values.into_iter().take(SAMPLE_LIMIT).collect(),
            Err(e) => {
                tracing::warn!(field = %field.name, error = %e, "field re-fetch failed; using cached sample");
                field.sample.iter().take(SAMPLE_LIMIT).cloned().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_host::{Dataset, InMemoryHost};
    use lumen_types::{FieldType, ObjectSnapshot};
    use serde_json::json;

    async fn builder(host: InMemoryHost) -> (ContextBuilder, Arc<InMemoryHost>) {
        let host = Arc::new(host);
        let mut catalog = FieldCatalog::default();
        catalog.initialize_from_host(host.as_ref()).await;
        let summaries = Arc::new(SummaryProvider::new(host.clone()));
        (
            ContextBuilder::new(Arc::new(catalog), host.clone(), summaries),
            host,
        )
    }

    fn dataset() -> Dataset {
        Dataset::default()
            .with_field("Region", vec![json!("North"), json!("South")])
            .with_field("Sales", (1..=20).map(|i| json!(i)).collect())
            .with_field("Order Date", vec![json!("2024-01-05")])
    }

    #[test]
    fn mentions_requires_word_boundaries() {
        assert!(mentions("total Sales by Region?", "Sales", MatchMode::Exact));
        assert!(mentions("Sales", "Sales", MatchMode::Exact));
        assert!(!mentions("SalesRep count", "Sales", MatchMode::Exact));
        assert!(!mentions("total sales", "Sales", MatchMode::Exact));
        assert!(mentions("total sales", "Sales", MatchMode::CaseInsensitive));
        assert!(mentions("trend of Order Date", "Order Date", MatchMode::Exact));
        assert!(!mentions("anything", "", MatchMode::Exact));
    }

    #[test]
    fn rejected_occurrence_does_not_hide_an_overlapping_one() {
        assert!(mentions("xa-a-a", "a-a", MatchMode::Exact));
        assert!(mentions("SalesSales Sales", "Sales", MatchMode::Exact));
        assert!(!mentions("xa-a-ax", "a-a", MatchMode::Exact));
    }

    #[tokio::test]
    async fn failed_refetch_falls_back_to_cached_sample() {
        let mut catalog = FieldCatalog::default();
        catalog
            .initialize_from_host(&InMemoryHost::new(dataset()))
            .await;

        let host = Arc::new(InMemoryHost::new(dataset()).fail_field("Sales"));
        let summaries = Arc::new(SummaryProvider::new(host.clone()));
        let builder = ContextBuilder::new(Arc::new(catalog), host, summaries);

        let ctx = builder.build("total Sales").await;
        let sales = &ctx.fields["Sales"];
        assert_eq!(sales.sample.len(), SAMPLE_LIMIT);
        assert_eq!(sales.sample[0], json!(1));
        assert_eq!(sales.summary.as_ref().and_then(|s| s.sum), Some(210.0));
    }

    #[tokio::test]
    async fn no_known_field_gives_empty_context() {
        let (builder, _) = builder(InMemoryHost::new(dataset())).await;
        let ctx = builder.build("how is the weather today?").await;
        assert!(ctx.fields.is_empty());
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn numeric_field_gets_sample_and_summary() {
        let (builder, _) = builder(InMemoryHost::new(dataset())).await;
        let ctx = builder.build("What are total Sales by Region?").await;

        assert_eq!(ctx.fields.len(), 2);
        let sales = &ctx.fields["Sales"];
        assert_eq!(sales.field_type, FieldType::Numeric);
        assert_eq!(sales.sample.len(), SAMPLE_LIMIT);
        assert_eq!(sales.summary.as_ref().and_then(|s| s.sum), Some(210.0));

        let region = &ctx.fields["Region"];
        assert_eq!(region.field_type, FieldType::String);
        assert!(region.summary.is_none());
    }

    #[tokio::test]
    async fn configured_objects_are_attached_and_failures_skipped() {
        let host = InMemoryHost::new(dataset().with_object(
            "kpi",
            ObjectSnapshot {
                headers: vec!["Region".into()],
                rows: (0..15).map(|i| vec![json!(i)]).collect(),
            },
        ))
        .fail_object("broken");
        let (builder, _) = builder(host).await;
        let builder = builder.with_objects(vec!["kpi".into(), "broken".into(), "missing".into()]);

        let ctx = builder.build("hello").await;
        assert!(ctx.fields.is_empty());
        assert_eq!(ctx.objects.len(), 1);
        assert_eq!(ctx.objects["kpi"].rows.len(), OBJECT_ROW_LIMIT);
    }
}
