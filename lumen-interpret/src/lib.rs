use lumen_types::ChartSpec;
use thiserror::Error;

/// Delimiter the model is asked to put before a chart description.
pub const DEFAULT_MARKER: &str = "VISUALIZATION:";

/// What the session shows for one model reply.
#[derive(Clone, Debug, PartialEq)]
pub struct Interpretation {
    pub display_text: String,
    pub chart: Option<ChartSpec>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ChartParseError {
    #[error("no JSON object after marker")]
    NoObject,
    #[error("invalid chart JSON: {0}")]
    Json(String),
    #[error("chart type is empty")]
    MissingType,
}

/// Splits a model reply into display text and an optional chart spec.
#[derive(Clone, Debug)]
pub struct ResponseInterpreter {
    marker: String,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl ResponseInterpreter {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Never fails. A reply without the marker is all text; a reply whose
    /// chart segment does not parse keeps the text before the marker and
    /// drops the chart.
    pub fn interpret(&self, reply: &str) -> Interpretation {
        let split = (!self.marker.is_empty())
            .then(|| reply.split_once(self.marker.as_str()))
            .flatten();
        let Some((before, after)) = split else {
            return Interpretation {
                display_text: reply.to_string(),
                chart: None,
            };
        };

        let display_text = before.trim().to_string();
        match parse_chart(after) {
            Ok(spec) => Interpretation {
                display_text,
                chart: Some(spec),
            },
            Err(e) => {
                tracing::warn!(error = %e, "chart segment rejected; replying with text only");
                Interpretation {
                    display_text,
                    chart: None,
                }
            }
        }
    }
}

/// Parse the text following the marker.
///
/// Accepts an optional Markdown code fence and ignores anything after the
/// first complete JSON object.
pub fn parse_chart(segment: &str) -> Result<ChartSpec, ChartParseError> {
    let segment = strip_fence(segment.trim());
    let start = segment.find('{').ok_or(ChartParseError::NoObject)?;

    let mut objects = serde_json::Deserializer::from_str(&segment[start..]).into_iter::<ChartSpec>();
    let mut spec = match objects.next() {
        Some(Ok(spec)) => spec,
        Some(Err(e)) => return Err(ChartParseError::Json(e.to_string())),
        None => return Err(ChartParseError::NoObject),
    };

    spec.chart_type = spec.chart_type.trim().to_string();
    if spec.chart_type.is_empty() {
        return Err(ChartParseError::MissingType);
    }
    Ok(spec)
}

fn strip_fence(segment: &str) -> &str {
    let Some(rest) = segment.strip_prefix("```") else {
        return segment;
    };
    // drop the info string (```json)
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.split_once("```").map_or(body, |(inner, _)| inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_reply_has_no_chart() {
        let out = ResponseInterpreter::default().interpret("plain text, no marker");
        assert_eq!(out.display_text, "plain text, no marker");
        assert!(out.chart.is_none());
    }

    #[test]
    fn malformed_chart_keeps_leading_text() {
        let out = ResponseInterpreter::default().interpret("Here you go VISUALIZATION:{not valid json");
        assert_eq!(out.display_text, "Here you go");
        assert!(out.chart.is_none());
    }

    #[test]
    fn valid_chart_is_extracted() {
        let out = ResponseInterpreter::default().interpret(
            r#"Analysis done VISUALIZATION:{"type":"bar","dimensions":["Region"],"measures":["Sales"],"properties":{}}"#,
        );
        assert_eq!(out.display_text, "Analysis done");
        let chart = out.chart.unwrap();
        assert_eq!(chart.chart_type, "bar");
        assert_eq!(chart.dimensions, vec!["Region".to_string()]);
        assert_eq!(chart.measures, vec!["Sales".to_string()]);
        assert!(chart.properties.is_empty());
    }

    #[test]
    fn fenced_chart_with_trailing_prose() {
        let reply = "Sales peaked in Q3.\nVISUALIZATION:\n```json\n{\"type\": \"line\", \"measures\": [\"Sum(Sales)\"]}\n```\nLet me know if you need more.";
        let out = ResponseInterpreter::default().interpret(reply);
        assert_eq!(out.display_text, "Sales peaked in Q3.");
        assert_eq!(out.chart.unwrap().chart_type, "line");
    }

    #[test]
    fn object_followed_by_text_parses() {
        let spec = parse_chart(r#" {"type":"pie"} and that's it"#).unwrap();
        assert_eq!(spec.chart_type, "pie");
    }

    #[test]
    fn schema_violations_are_rejected() {
        assert_eq!(parse_chart("no json here"), Err(ChartParseError::NoObject));
        assert_eq!(parse_chart(r#"{"type":"  "}"#), Err(ChartParseError::MissingType));
        assert!(matches!(
            parse_chart(r#"{"dimensions":["Region"]}"#),
            Err(ChartParseError::Json(_))
        ));
        assert!(matches!(
            parse_chart(r#"{"type":"bar","measures":"Sales"}"#),
            Err(ChartParseError::Json(_))
        ));
    }

    #[test]
    fn custom_marker_is_honored() {
        let interpreter = ResponseInterpreter::new("CHART>>");
        let out = interpreter.interpret(r#"See below CHART>> {"type":"table"}"#);
        assert_eq!(out.display_text, "See below");
        assert_eq!(out.chart.unwrap().chart_type, "table");
        let out = interpreter.interpret(r#"VISUALIZATION:{"type":"bar"}"#);
        assert!(out.chart.is_none());
    }
}
