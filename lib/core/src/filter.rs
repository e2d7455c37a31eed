// Metadata filters evaluated against document metadata
use serde_json::Value;
use crate::Document;

pub trait Filter {
    fn matches(&self, document: &Document) -> bool;
}

pub struct PayloadFilter {
    condition: FilterCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    GreaterThan { field: String, value: f64 },
    LessThan { field: String, value: f64 },
    GreaterEqual { field: String, value: f64 },
    LessEqual { field: String, value: f64 },
    Contains { field: String, value: String },
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
    Not(Box<FilterCondition>),
}

impl FilterCondition {
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        FilterCondition::Equals {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        FilterCondition::GreaterThan {
            field: field.to_string(),
            value,
        }
    }

    pub fn and(self, other: FilterCondition) -> Self {
        match self {
            FilterCondition::And(mut conditions) => {
                conditions.push(other);
                FilterCondition::And(conditions)
            }
            first => FilterCondition::And(vec![first, other]),
        }
    }

    /// Active products with stock left.
    pub fn available_products() -> Self {
        FilterCondition::equals("is_active", true).and(FilterCondition::greater_than("stock", 0.0))
    }

    pub fn matches_metadata(&self, metadata: Option<&Value>) -> bool {
        let field = |name: &str| field_value(metadata, name);

        match self {
            FilterCondition::Equals { field: name, value } => {
                field(name).map(|v| v == value).unwrap_or(false)
            }
            FilterCondition::NotEquals { field: name, value } => {
                field(name).map(|v| v != value).unwrap_or(true)
            }
            FilterCondition::GreaterThan { field: name, value } => field(name)
                .and_then(Value::as_f64)
                .map(|v| v > *value)
                .unwrap_or(false),
            FilterCondition::LessThan { field: name, value } => field(name)
                .and_then(Value::as_f64)
                .map(|v| v < *value)
                .unwrap_or(false),
            FilterCondition::GreaterEqual { field: name, value } => field(name)
                .and_then(Value::as_f64)
                .map(|v| v >= *value)
                .unwrap_or(false),
            FilterCondition::LessEqual { field: name, value } => field(name)
                .and_then(Value::as_f64)
                .map(|v| v <= *value)
                .unwrap_or(false),
            FilterCondition::Contains { field: name, value } => field(name)
                .and_then(Value::as_str)
                .map(|v| v.contains(value.as_str()))
                .unwrap_or(false),
            FilterCondition::And(conditions) => {
                conditions.iter().all(|c| c.matches_metadata(metadata))
            }
            FilterCondition::Or(conditions) => {
                conditions.iter().any(|c| c.matches_metadata(metadata))
            }
            FilterCondition::Not(condition) => !condition.matches_metadata(metadata),
        }
    }
}

fn field_value<'a>(metadata: Option<&'a Value>, field: &str) -> Option<&'a Value> {
    let field = field.strip_prefix('.').unwrap_or(field);
    metadata.and_then(|m| m.get(field))
}

impl PayloadFilter {
    pub fn new(condition: FilterCondition) -> Self {
        Self { condition }
    }

    pub fn condition(&self) -> &FilterCondition {
        &self.condition
    }
}

impl Filter for PayloadFilter {
    fn matches(&self, document: &Document) -> bool {
        self.condition.matches_metadata(document.metadata.as_ref())
    }
}

impl Filter for FilterCondition {
    fn matches(&self, document: &Document) -> bool {
        self.matches_metadata(document.metadata.as_ref())
    }
}
