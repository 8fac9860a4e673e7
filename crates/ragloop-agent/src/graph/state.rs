use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use ragloop_core::error::{RagloopError, Result};
use ragloop_core::types::Rating;

/// JSON key listing the fields that hold placeholder text.
pub const PLACEHOLDERS_KEY: &str = "placeholders";

/// The fixed set of fields a workflow run can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Query,
    IsSmalltalk,
    RagAnswer,
    WebAnswer,
    RetrievalSummary,
    WebSummary,
    MergedSummary,
    Rating,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Query,
        Field::IsSmalltalk,
        Field::RagAnswer,
        Field::WebAnswer,
        Field::RetrievalSummary,
        Field::WebSummary,
        Field::MergedSummary,
        Field::Rating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Query => "query",
            Field::IsSmalltalk => "is_smalltalk",
            Field::RagAnswer => "rag_answer",
            Field::WebAnswer => "web_answer",
            Field::RetrievalSummary => "retrieval_summary",
            Field::WebSummary => "web_summary",
            Field::MergedSummary => "merged_summary",
            Field::Rating => "rating",
        }
    }

    pub fn parse(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field value.
///
/// `Placeholder` is text a step wrote in place of a real result (empty
/// result, collaborator failure, fast path). It reads like text but
/// downstream steps can tell it apart from content.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Placeholder(String),
    Flag(bool),
    Rating(Rating),
}

impl Value {
    /// Text of a `Text` or `Placeholder` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Placeholder(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Value::Placeholder(_))
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) | Value::Placeholder(s) => serde_json::Value::String(s.clone()),
            Value::Flag(b) => serde_json::Value::Bool(*b),
            Value::Rating(r) => serde_json::Value::String(r.as_str().to_string()),
        }
    }
}

/// A partial update produced by one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    values: BTreeMap<Field, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: Field, value: Value) {
        self.values.insert(field, value);
    }

    pub fn with(mut self, field: Field, value: Value) -> Self {
        self.set(field, value);
        self
    }

    pub fn with_text(self, field: Field, text: impl Into<String>) -> Self {
        self.with(field, Value::Text(text.into()))
    }

    pub fn with_placeholder(self, field: Field, text: impl Into<String>) -> Self {
        self.with(field, Value::Placeholder(text.into()))
    }

    pub fn with_flag(self, field: Field, flag: bool) -> Self {
        self.with(field, Value::Flag(flag))
    }

    pub fn with_rating(self, rating: Rating) -> Self {
        self.with(Field::Rating, Value::Rating(rating))
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.values.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.values.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Key-wise overwrite with `other`.
    pub fn merge(&mut self, other: StateUpdate) {
        self.values.extend(other.values);
    }

    /// Keep only `allowed` fields; returns the fields that were dropped.
    pub fn restrict_to(&mut self, allowed: &[Field]) -> Vec<Field> {
        let dropped: Vec<Field> = self
            .values
            .keys()
            .filter(|f| !allowed.contains(f))
            .copied()
            .collect();
        for field in &dropped {
            self.values.remove(field);
        }
        dropped
    }
}

/// Cumulative state of one run.
///
/// Fields are absent until written and are only ever overwritten, never
/// removed; state survives loop-back unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowState {
    values: BTreeMap<Field, Value>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial state for a query.
    pub fn with_query(query: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.values.insert(Field::Query, Value::Text(query.into()));
        state
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.values.get(&field)
    }

    /// Text of the field, placeholder or not.
    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(Value::as_text)
    }

    /// Real, non-blank content of the field. Placeholders read as absent.
    pub fn content(&self, field: Field) -> Option<&str> {
        match self.get(field) {
            Some(Value::Text(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn flag(&self, field: Field) -> bool {
        matches!(self.get(field), Some(Value::Flag(true)))
    }

    /// The rating tag, if the field holds a recognised one.
    pub fn rating(&self) -> Option<Rating> {
        match self.get(Field::Rating) {
            Some(Value::Rating(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.text(Field::Query)
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    pub fn is_smalltalk(&self) -> bool {
        self.flag(Field::IsSmalltalk)
    }

    /// Fields currently holding placeholder text.
    pub fn placeholders(&self) -> Vec<Field> {
        self.values
            .iter()
            .filter(|(_, v)| v.is_placeholder())
            .map(|(f, _)| *f)
            .collect()
    }

    /// Shallow key-wise overwrite; last writer wins.
    pub fn merge(&mut self, update: &StateUpdate) {
        for (field, value) in &update.values {
            self.values.insert(*field, value.clone());
        }
    }

    /// Flat JSON object keyed by field name.
    ///
    /// Placeholder fields serialize as plain strings and are also listed
    /// under `placeholders`, so `from_json` restores them as placeholders.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(f, v)| (f.as_str().to_string(), v.to_json()))
            .collect();
        let placeholders = self.placeholders();
        if !placeholders.is_empty() {
            map.insert(
                PLACEHOLDERS_KEY.to_string(),
                placeholders.iter().map(|f| f.as_str()).collect(),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Build a state from a flat JSON object.
    ///
    /// Unknown field names and wrong-typed values are rejected; `null` means
    /// absent. A rating string outside the enumeration is kept as plain text
    /// so the router can apply its fallback.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| RagloopError::InvalidState("expected a JSON object".into()))?;

        let placeholders = match object.get(PLACEHOLDERS_KEY) {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().and_then(Field::parse).ok_or_else(|| {
                        RagloopError::InvalidState(format!(
                            "'{}' must list field names, got {}",
                            PLACEHOLDERS_KEY, item
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(RagloopError::InvalidState(format!(
                    "'{}' must be an array",
                    PLACEHOLDERS_KEY
                )));
            }
        };

        let mut state = Self::new();
        for (key, raw) in object {
            if key == PLACEHOLDERS_KEY {
                continue;
            }
            let field = Field::parse(key)
                .ok_or_else(|| RagloopError::InvalidState(format!("unknown field '{}'", key)))?;
            let value = match (field, raw) {
                (_, serde_json::Value::Null) => continue,
                (Field::IsSmalltalk, serde_json::Value::Bool(b)) => Value::Flag(*b),
                (Field::Rating, serde_json::Value::String(s)) => match Rating::parse(s) {
                    Some(r) => Value::Rating(r),
                    None => Value::Text(s.clone()),
                },
                (Field::IsSmalltalk, _) => {
                    return Err(RagloopError::InvalidState(format!(
                        "field '{}' must be a boolean",
                        key
                    )));
                }
                (_, serde_json::Value::String(s)) if placeholders.contains(&field) => {
                    Value::Placeholder(s.clone())
                }
                (_, serde_json::Value::String(s)) => Value::Text(s.clone()),
                _ => {
                    return Err(RagloopError::InvalidState(format!(
                        "field '{}' must be a string",
                        key
                    )));
                }
            };
            state.values.insert(field, value);
        }
        Ok(state)
    }
}

impl Serialize for WorkflowState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WorkflowState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        WorkflowState::from_json(&json).map_err(D::Error::custom)
    }
}
