//! Orchestration for `autoaction replay`.
//!
//! Builds actions and recording handlers from a [`Scenario`], mounts a
//! wrapped engine over an in-memory [`Store`], applies each step, settles any
//! pending ticks and unmounts. Every handler call is recorded with the step
//! that caused it (step 0 is the mount).

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::queue::HandlerFailure;
use crate::core::resolver::ActionSpecs;
use crate::engine::{Handler, Handlers, handler};
use crate::io::scenario::{HandlerConfig, Scenario, SchedulerMode, Step, load_scenario};
use crate::io::scheduler::{Immediate, Scheduler, TickScheduler};
use crate::io::store::Store;
use crate::wrap::AutoActions;

/// Upper bound on ticks run after the last step to flush deferred work.
const SETTLE_MAX_TICKS: usize = 1_000;

/// One recorded handler call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub step: usize,
    pub action: String,
    pub args: Vec<Value>,
}

/// A handler error surfaced during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub step: usize,
    pub action: String,
    pub message: String,
}

/// Result of a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub invocations: Vec<Invocation>,
    pub failures: Vec<Failure>,
    /// Times the wrapped target rendered (mount included).
    pub renders: usize,
    pub final_state: Value,
}

impl ReplayOutcome {
    /// Human-readable report, one line per invocation or failure.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .invocations
            .iter()
            .map(|call| {
                let args: Vec<String> = call.args.iter().map(Value::to_string).collect();
                format!("step {}: {}({})", call.step, call.action, args.join(", "))
            })
            .collect();
        lines.extend(
            self.failures
                .iter()
                .map(|f| format!("step {}: {} failed: {}", f.step, f.action, f.message)),
        );
        lines
    }
}

/// Load a scenario file and replay it.
pub fn replay_file(path: &Path) -> Result<ReplayOutcome> {
    let scenario = load_scenario(path)?;
    replay(&scenario).with_context(|| format!("replay {}", path.display()))
}

pub fn replay(scenario: &Scenario) -> Result<ReplayOutcome> {
    let store = Store::new(scenario.state.clone());
    let calls = Rc::new(RefCell::new(Vec::new()));
    let current_step = Rc::new(Cell::new(0usize));

    let mut specs = ActionSpecs::new();
    let mut handlers = Handlers::new();
    for (name, config) in &scenario.actions {
        let spec = config
            .to_spec()
            .with_context(|| format!("action '{}'", name))?;
        specs = specs.with(name.clone(), spec);
        handlers.insert(
            name.clone(),
            recording_handler(name, &config.handler, &store, &calls, &current_step),
        );
    }
    let actions = AutoActions::new(specs, handlers)?;

    let ticks = match scenario.scheduler {
        SchedulerMode::Tick => Some(TickScheduler::new()),
        SchedulerMode::Immediate => None,
    };
    let scheduler: Rc<dyn Scheduler> = match &ticks {
        Some(ticks) => Rc::new(ticks.clone()),
        None => Rc::new(Immediate),
    };

    let renders = Rc::new(Cell::new(0usize));
    let render_count = Rc::clone(&renders);
    let mut wrapped = actions.wrap(move |_: &Value| render_count.set(render_count.get() + 1));

    let mut failures = Vec::new();
    let report = wrapped
        .mount(
            Rc::new(store.clone()),
            Rc::clone(&scheduler),
            scenario.inputs.clone(),
        )
        .context("mount")?;
    record_failures(&mut failures, 0, report.failures);
    record_failures(&mut failures, 0, wrapped.take_failures());

    for (index, step) in scenario.steps.iter().enumerate() {
        let number = index + 1;
        current_step.set(number);
        debug!(number, ?step, "replaying step");

        match step {
            Step::SetState { pointer, value } => {
                let mut next = store.get();
                write_pointer(&mut next, pointer, value.clone())
                    .with_context(|| format!("step {}: set_state", number))?;
                store.set(next);
            }
            Step::SetInputs { value } => {
                wrapped
                    .update(value.clone())
                    .with_context(|| format!("step {}: set_inputs", number))?;
            }
            Step::Notify => store.notify(),
            Step::Tick => match &ticks {
                Some(ticks) => {
                    ticks.tick();
                }
                None => debug!("immediate scheduler; tick is a no-op"),
            },
            Step::Teardown => {
                wrapped
                    .unmount()
                    .with_context(|| format!("step {}: teardown", number))?;
            }
        }
        record_failures(&mut failures, number, wrapped.take_failures());
    }

    if let Some(ticks) = &ticks {
        let settled = ticks.run_until_idle(SETTLE_MAX_TICKS);
        if settled > 0 {
            debug!(ticks = settled, "settled pending ticks");
        }
        record_failures(&mut failures, scenario.steps.len(), wrapped.take_failures());
    }
    if wrapped.is_mounted() {
        wrapped.unmount()?;
    }

    let invocations = calls.borrow().clone();
    info!(
        invocations = invocations.len(),
        failures = failures.len(),
        "replay finished"
    );
    Ok(ReplayOutcome {
        invocations,
        failures,
        renders: renders.get(),
        final_state: store.get(),
    })
}

fn record_failures(out: &mut Vec<Failure>, step: usize, failures: Vec<HandlerFailure>) {
    out.extend(failures.into_iter().map(|failure| Failure {
        step,
        action: failure.action,
        message: format!("{:#}", failure.error),
    }));
}

/// Handler that records the call, then fails or writes into the store as
/// configured.
fn recording_handler(
    action: &str,
    config: &HandlerConfig,
    store: &Store<Value>,
    calls: &Rc<RefCell<Vec<Invocation>>>,
    current_step: &Rc<Cell<usize>>,
) -> Handler {
    let action = action.to_string();
    let config = config.clone();
    let store = store.clone();
    let calls = Rc::clone(calls);
    let current_step = Rc::clone(current_step);

    handler(move |args: &[Value]| {
        calls.borrow_mut().push(Invocation {
            step: current_step.get(),
            action: action.clone(),
            args: args.to_vec(),
        });
        if config.fail {
            bail!("handler '{}' is configured to fail", action);
        }
        if let Some(pointer) = &config.set {
            let value = args.first().cloned().unwrap_or(Value::Null);
            let mut next = store.get();
            write_pointer(&mut next, pointer, value)?;
            store.set(next);
        }
        Ok(())
    })
}

/// Write `value` at JSON pointer `pointer`, creating missing objects on the
/// way. An array index equal to the length (or `-`) appends.
fn write_pointer(doc: &mut Value, pointer: &str, value: Value) -> Result<()> {
    if pointer.is_empty() {
        *doc = value;
        return Ok(());
    }
    let path = pointer
        .strip_prefix('/')
        .ok_or_else(|| anyhow!("pointer '{}' must start with '/'", pointer))?;
    let tokens: Vec<String> = path
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect();
    let Some((last, parents)) = tokens.split_last() else {
        bail!("pointer '{}' has no tokens", pointer);
    };

    let mut target = doc;
    for token in parents {
        target = child_mut(target, token, pointer)?;
    }
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    match target {
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
            } else {
                let index: usize = last
                    .parse()
                    .with_context(|| format!("pointer '{}': bad array index '{}'", pointer, last))?;
                if index < items.len() {
                    items[index] = value;
                } else if index == items.len() {
                    items.push(value);
                } else {
                    bail!("pointer '{}': index {} out of bounds", pointer, index);
                }
            }
        }
        _ => bail!("pointer '{}': parent is not an object or array", pointer),
    }
    Ok(())
}

fn child_mut<'a>(target: &'a mut Value, token: &str, pointer: &str) -> Result<&'a mut Value> {
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    match target {
        Value::Object(map) => Ok(map
            .entry(token.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index: usize = token
                .parse()
                .with_context(|| format!("pointer '{}': bad array index '{}'", pointer, token))?;
            items
                .get_mut(index)
                .ok_or_else(|| anyhow!("pointer '{}': index {} out of bounds", pointer, index))
        }
        _ => bail!("pointer '{}': '{}' is not an object or array", pointer, token),
    }
}
