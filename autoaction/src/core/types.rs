//! Value model shared by the resolver, filters and the dispatch queue.
//!
//! Argument values are plain JSON values so that equality is structural all the
//! way down. An argument slot that could not be resolved yet is `None`.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

/// Optional dedup key attached to a descriptor. `None` is the null key.
pub type Key = Option<Value>;

/// Resolved arguments for one action.
#[derive(Debug, Clone, PartialEq)]
pub enum Args {
    /// The whole argument value is missing.
    Unresolved,
    /// Ordered arguments, spread positionally into the handler.
    Seq(Vec<Option<Value>>),
    /// Keyed arguments, passed to the handler as one object.
    Map(BTreeMap<String, Option<Value>>),
    /// A single argument.
    Scalar(Value),
}

impl Args {
    /// Ordered arguments that are all resolved.
    pub fn values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Args::Seq(values.into_iter().map(Some).collect())
    }

    /// Ordered arguments where any slot may be unresolved.
    pub fn seq<I>(slots: I) -> Self
    where
        I: IntoIterator<Item = Option<Value>>,
    {
        Args::Seq(slots.into_iter().collect())
    }

    /// Keyed arguments where any value may be unresolved.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Option<Value>)>,
    {
        Args::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Single argument, or `Unresolved` when missing.
    pub fn scalar(value: Option<Value>) -> Self {
        value.map_or(Args::Unresolved, Args::Scalar)
    }

    /// Positional arguments handed to a handler.
    ///
    /// Unresolved slots never reach a handler; if one is present anyway it is
    /// passed as `null`.
    pub fn to_call_args(&self) -> Vec<Value> {
        match self {
            Args::Unresolved => Vec::new(),
            Args::Seq(slots) => slots
                .iter()
                .map(|slot| slot.clone().unwrap_or(Value::Null))
                .collect(),
            Args::Map(entries) => {
                let object: Map<String, Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().unwrap_or(Value::Null)))
                    .collect();
                vec![Value::Object(object)]
            }
            Args::Scalar(value) => vec![value.clone()],
        }
    }
}

impl From<Value> for Args {
    /// Arrays become ordered args, objects keyed args, anything else a scalar.
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Args::values(items),
            Value::Object(object) => {
                Args::Map(object.into_iter().map(|(k, v)| (k, Some(v))).collect())
            }
            other => Args::Scalar(other),
        }
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn slot(value: &Option<Value>) -> String {
            value
                .as_ref()
                .map_or_else(|| "<unresolved>".to_string(), Value::to_string)
        }
        match self {
            Args::Unresolved => write!(f, "<unresolved>"),
            Args::Seq(slots) => {
                let parts: Vec<String> = slots.iter().map(slot).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Args::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, slot(v)))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Args::Scalar(value) => write!(f, "{}", value),
        }
    }
}

/// Resolved snapshot for one action at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDescriptor {
    pub args: Args,
    pub key: Key,
}

impl ActionDescriptor {
    pub fn new(args: Args, key: Key) -> Self {
        Self { args, key }
    }

    pub fn unkeyed(args: Args) -> Self {
        Self { args, key: None }
    }
}

/// Resolved descriptors for every configured action, ordered by action name.
pub type Descriptors = BTreeMap<String, ActionDescriptor>;
