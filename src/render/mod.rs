//! Schema-less rendering of query output.
//!
//! [`Renderer::render`] turns any [`Value`] into a [`RenderNode`] tree: scalars become
//! text leaves, sequences and mappings become collapsible tables. Rendering is
//! deterministic, so rendering the same value twice yields equal trees.

pub mod text;

use indexmap::{IndexMap, IndexSet};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Hierarchical value of unknown shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// Date-time value. JSON input never produces one; hosts that decode typed
    /// values build it directly.
    #[allow(dead_code)]
    Temporal(OffsetDateTime),
    Sequence(Vec<Value>),
    Mapping(IndexMap<String, Value>),
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.clone()),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Sequence(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Collapsed,
    Expanded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderNode {
    /// Null or missing value; displays as nothing.
    Blank,
    Text(String),
    Collapsible(Collapsible),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collapsible {
    /// Summary shown while collapsed, e.g. `Array[3]` or `Object`.
    pub label: String,
    pub disposition: Disposition,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Table(Table),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// `None` for single-column tables of sequence elements.
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<RenderNode>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    disposition: Disposition,
}

impl Renderer {
    /// Renderer whose composite nodes all start with `disposition`.
    pub fn new(disposition: Disposition) -> Self {
        Self { disposition }
    }

    pub fn render(&self, value: &Value) -> RenderNode {
        match value {
            Value::Null => RenderNode::Blank,
            Value::Bool(b) => RenderNode::Text(b.to_string()),
            Value::Number(n) => RenderNode::Text(number_text(n)),
            Value::String(s) => RenderNode::Text(s.clone()),
            Value::Temporal(t) => RenderNode::Text(timestamp_text(t)),
            Value::Sequence(items) => self.render_sequence(items),
            Value::Mapping(map) => self.render_mapping(map),
        }
    }

    pub fn render_json(&self, value: &serde_json::Value) -> RenderNode {
        self.render(&Value::from(value))
    }

    fn render_sequence(&self, items: &[Value]) -> RenderNode {
        if items.is_empty() {
            return self.collapsible("Array[0]".to_string(), Body::Text("[]".to_string()));
        }

        let label = format!("Array[{}]", items.len());
        let all_objects = items.iter().all(|item| matches!(item, Value::Mapping(_)));
        let table = if all_objects {
            let columns: IndexSet<&str> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Mapping(map) => Some(map.keys().map(String::as_str)),
                    _ => None,
                })
                .flatten()
                .collect();
            let rows = items
                .iter()
                .map(|item| {
                    columns
                        .iter()
                        .map(|key| match item {
                            Value::Mapping(map) => {
                                map.get(*key).map_or(RenderNode::Blank, |v| self.render(v))
                            }
                            _ => RenderNode::Blank,
                        })
                        .collect()
                })
                .collect();
            Table {
                header: Some(columns.iter().map(|c| c.to_string()).collect()),
                rows,
            }
        } else {
            Table {
                header: None,
                rows: items.iter().map(|item| vec![self.render(item)]).collect(),
            }
        };
        self.collapsible(label, Body::Table(table))
    }

    fn render_mapping(&self, map: &IndexMap<String, Value>) -> RenderNode {
        if map.is_empty() {
            return RenderNode::Text("{}".to_string());
        }
        let rows = map
            .iter()
            .map(|(key, value)| vec![RenderNode::Text(key.clone()), self.render(value)])
            .collect();
        self.collapsible(
            "Object".to_string(),
            Body::Table(Table {
                header: Some(vec!["Key".to_string(), "Value".to_string()]),
                rows,
            }),
        )
    }

    fn collapsible(&self, label: String, body: Body) -> RenderNode {
        RenderNode::Collapsible(Collapsible {
            label,
            disposition: self.disposition,
            body,
        })
    }
}

fn number_text(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        // f64 Display drops a trailing `.0`, matching the usual textual form.
        n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string())
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`, always in UTC.
fn timestamp_text(t: &OffsetDateTime) -> String {
    let utc = t.to_offset(UtcOffset::UTC);
    utc.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ))
    .unwrap_or_else(|_| utc.to_string())
}
