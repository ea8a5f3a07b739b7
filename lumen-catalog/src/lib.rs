use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures_util::future::join_all;
use lumen_host::HostPlatform;
use lumen_types::{Field, FieldType, FieldValue};

pub mod summary;
pub use summary::{Aggregate, SummaryProvider};

/// Default number of values cached per field.
pub const DEFAULT_SAMPLE_CAP: usize = 100;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Known dataset fields, keyed by name.
///
/// Populated once from the host and read-only afterwards. A field whose data
/// could not be fetched is simply not in the catalog.
#[derive(Clone, Debug)]
pub struct FieldCatalog {
    fields: BTreeMap<String, Field>,
    sample_cap: usize,
}

impl Default for FieldCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAP)
    }
}

impl FieldCatalog {
    pub fn new(sample_cap: usize) -> Self {
        Self {
            fields: BTreeMap::new(),
            sample_cap,
        }
    }

    /// Fetch every named field from the host and infer its type.
    ///
    /// Fetches run concurrently. Failed fetches are logged and leave the field out.
    pub async fn initialize(&mut self, host: &dyn HostPlatform, field_names: &[String]) {
        let fetches = field_names.iter().map(|name| async move {
            (name, host.field_values(name).await)
        });

        for (name, result) in join_all(fetches).await {
            match result {
                Ok(values) => {
                    let field_type = infer_field_type(&values);
                    let sample: Vec<FieldValue> =
                        values.into_iter().take(self.sample_cap).collect();
                    self.fields.insert(
                        name.clone(),
                        Field {
                            name: name.clone(),
                            field_type,
                            sample,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(field = %name, error = %e, "field data fetch failed; skipping");
                }
            }
        }

        tracing::info!(
            requested = field_names.len(),
            loaded = self.fields.len(),
            "field catalog initialized"
        );
    }

    /// List the host's fields, then [`initialize`](Self::initialize) with them.
    pub async fn initialize_from_host(&mut self, host: &dyn HostPlatform) {
        match host.list_fields().await {
            Ok(names) => self.initialize(host, &names).await,
            Err(e) => tracing::warn!(error = %e, "field listing failed; catalog stays empty"),
        }
    }

    /// Look up a field. `None` means the field is unknown.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).map(|f| f.field_type)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Infer a field's type from its first non-empty value only.
///
/// Mixed-type columns get whatever their first value says.
pub fn infer_field_type(values: &[FieldValue]) -> FieldType {
    let first = values.iter().find(|v| match v {
        FieldValue::Null => false,
        FieldValue::String(s) => !s.trim().is_empty(),
        _ => true,
    });

    match first {
        Some(FieldValue::Number(_)) => FieldType::Numeric,
        Some(FieldValue::String(s)) => {
            let s = s.trim();
            if s.parse::<f64>().is_ok() {
                FieldType::Numeric
            } else if parses_as_date(s) {
                FieldType::Date
            } else {
                FieldType::String
            }
        }
        _ => FieldType::String,
    }
}

fn parses_as_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || DATE_FORMATS
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(s, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(s, fmt).is_ok())
}
