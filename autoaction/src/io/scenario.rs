//! Replay scenarios stored as TOML.
//!
//! A scenario names the initial state and inputs, declares actions whose
//! arguments are JSON-pointer selectors into `/inputs` or `/state`, and lists
//! the steps to replay against a mounted engine. Loading goes TOML → JSON
//! Schema → typed struct → semantic invariants.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::resolver::{ActionSpec, ArgsFn};
use crate::core::types::Args;

pub const SCENARIO_SCHEMA: &str = include_str!("../../schemas/scenario/v1.schema.json");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Recomputations run inline with the notification.
    #[default]
    Immediate,
    /// Recomputations wait for a `tick` step.
    Tick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub scheduler: SchedulerMode,
    #[serde(default = "empty_object")]
    pub state: Value,
    #[serde(default = "empty_object")]
    pub inputs: Value,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionConfig>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One action. Exactly one of `literal`, `args`, `arg`, `args_map` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Fixed arguments: arrays spread, tables pass as one object.
    pub literal: Option<Value>,
    /// Ordered selectors.
    pub args: Option<Vec<String>>,
    /// Single selector.
    pub arg: Option<String>,
    /// Named selectors, passed as one object.
    pub args_map: Option<BTreeMap<String, String>>,
    /// Selector for the dedup key.
    pub key: Option<String>,
    pub handler: HandlerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Write the first argument into state at this pointer.
    pub set: Option<String>,
    /// Return an error instead of succeeding.
    pub fail: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    SetState { pointer: String, value: Value },
    SetInputs { value: Value },
    Notify,
    Tick,
    Teardown,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl ActionConfig {
    fn shape_count(&self) -> usize {
        [
            self.literal.is_some(),
            self.args.is_some(),
            self.arg.is_some(),
            self.args_map.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Build the action spec this config describes.
    pub fn to_spec(&self) -> Result<ActionSpec<Value, Value>> {
        if self.shape_count() != 1 {
            bail!("exactly one of literal, args, arg, args_map is required");
        }

        if let Some(literal) = &self.literal {
            if self.key.is_some() {
                bail!("key requires a computed shape, not literal");
            }
            return Ok(ActionSpec::literal(Args::from(literal.clone())));
        }

        let args: ArgsFn<Value, Value> = if let Some(selectors) = self.args.clone() {
            Rc::new(move |inputs: &Value, state: &Value| {
                Args::seq(selectors.iter().map(|s| select(s, inputs, state)))
            })
        } else if let Some(selector) = self.arg.clone() {
            Rc::new(move |inputs: &Value, state: &Value| {
                Args::scalar(select(&selector, inputs, state))
            })
        } else if let Some(selectors) = self.args_map.clone() {
            Rc::new(move |inputs: &Value, state: &Value| {
                Args::map(
                    selectors
                        .iter()
                        .map(|(name, s)| (name.clone(), select(s, inputs, state))),
                )
            })
        } else {
            return Err(anyhow!("action has no argument shape"));
        };

        Ok(match self.key.clone() {
            Some(key) => ActionSpec::Keyed {
                args,
                key: Rc::new(move |inputs: &Value, state: &Value| select(&key, inputs, state)),
            },
            None => ActionSpec::Computed(args),
        })
    }
}

/// Read the value a selector points at. `None` when the path is missing or
/// the selector is not rooted at `/inputs` or `/state`.
pub fn select(selector: &str, inputs: &Value, state: &Value) -> Option<Value> {
    let (root, rest) = if let Some(rest) = selector.strip_prefix("/inputs") {
        (inputs, rest)
    } else if let Some(rest) = selector.strip_prefix("/state") {
        (state, rest)
    } else {
        return None;
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    root.pointer(rest).cloned()
}

/// Semantic checks not expressible in the JSON Schema:
/// - Exactly one argument shape per action
/// - `key` only on computed shapes
pub fn validate_scenario(scenario: &Scenario) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, action) in &scenario.actions {
        let shapes = action.shape_count();
        if shapes != 1 {
            errors.push(format!(
                "action '{}': exactly one of literal, args, arg, args_map is required (found {})",
                name, shapes
            ));
        }
        if action.literal.is_some() && action.key.is_some() {
            errors.push(format!("action '{}': key requires a computed shape", name));
        }
    }
    errors
}

/// Parse and validate a scenario: schema conformance + semantic invariants.
pub fn parse_scenario(raw: &str) -> Result<Scenario> {
    let doc: Value = toml::from_str(raw).context("parse scenario toml")?;
    let schema: Value = serde_json::from_str(SCENARIO_SCHEMA).context("parse scenario schema")?;
    validate_schema(&doc, &schema)?;

    let scenario: Scenario = serde_json::from_value(doc).context("parse scenario as v1 struct")?;
    let errors = validate_scenario(&scenario);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    debug!(
        actions = scenario.actions.len(),
        steps = scenario.steps.len(),
        "scenario loaded"
    );
    Ok(scenario)
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_scenario(&raw).with_context(|| format!("load {}", path.display()))
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
