//! Test-only helpers: recording handlers, common action specs and scenario
//! files on disk.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::resolver::ActionSpec;
use crate::core::types::Args;
use crate::engine::{Handler, Handlers, handler};

/// Shared record of handler invocations, in call order.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<(String, Vec<Value>)>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that records `(action, args)` and succeeds.
    pub fn handler(&self, action: &str) -> Handler {
        let calls = Rc::clone(&self.calls);
        let action = action.to_string();
        handler(move |args: &[Value]| {
            calls.borrow_mut().push((action.clone(), args.to_vec()));
            Ok(())
        })
    }

    /// One recording handler per name.
    pub fn handlers<I, N>(&self, names: I) -> Handlers
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| (name.as_ref().to_string(), self.handler(name.as_ref())))
            .collect()
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.borrow().clone()
    }

    /// Argument lists recorded for `action`.
    pub fn args_for(&self, action: &str) -> Vec<Vec<Value>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(name, _)| name == action)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|(name, _)| name == action)
            .count()
    }
}

/// Single-element args read from `inputs[field]`.
pub fn seq_from_inputs(field: &'static str) -> ActionSpec<Value, Value> {
    ActionSpec::computed(move |inputs: &Value, _state: &Value| {
        Args::seq([inputs.get(field).cloned()])
    })
}

/// Single-element args read from `state[field]`.
pub fn seq_from_state(field: &'static str) -> ActionSpec<Value, Value> {
    ActionSpec::computed(move |_inputs: &Value, state: &Value| {
        Args::seq([state.get(field).cloned()])
    })
}

/// A scenario file written into a temporary directory.
pub struct ScenarioFile {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl ScenarioFile {
    pub fn new(contents: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let path = dir.path().join("scenario.toml");
        std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
