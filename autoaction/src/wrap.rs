//! Wrap-time configuration and the host-facing wrapped unit.
//!
//! [`AutoActions`] is built once from action specs and handlers and checked
//! eagerly; a bad configuration fails here, never during resolution. Each
//! [`Wrapped`] produced from it mounts its own [`Engine`], so instances never
//! share a queue or a baseline.

use std::rc::Rc;

use anyhow::{Result, anyhow, bail};

use crate::core::invariants::validate_bindings;
use crate::core::queue::{DrainReport, HandlerFailure};
use crate::core::resolver::ActionSpecs;
use crate::engine::{Engine, Handler, Handlers};
use crate::io::scheduler::Scheduler;
use crate::io::store::StateSource;

/// Validated action specs and their handlers. Cheap to clone.
pub struct AutoActions<I, S> {
    specs: Rc<ActionSpecs<I, S>>,
    handlers: Rc<Handlers>,
}

impl<I, S> Clone for AutoActions<I, S> {
    fn clone(&self) -> Self {
        Self {
            specs: Rc::clone(&self.specs),
            handlers: Rc::clone(&self.handlers),
        }
    }
}

impl<I, S> std::fmt::Debug for AutoActions<I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoActions")
            .field("specs", &self.specs)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<I, S> AutoActions<I, S> {
    /// Check that every action has a handler and every handler an action.
    pub fn new(specs: ActionSpecs<I, S>, handlers: Handlers) -> Result<Self> {
        let errors = validate_bindings(specs.names(), handlers.keys().map(String::as_str));
        if !errors.is_empty() {
            bail!("invalid autoaction configuration:\n- {}", errors.join("\n- "));
        }
        Ok(Self {
            specs: Rc::new(specs),
            handlers: Rc::new(handlers),
        })
    }

    /// No actions, no handlers. Mounts fine and never dispatches.
    pub fn empty() -> Self {
        Self {
            specs: Rc::new(ActionSpecs::new()),
            handlers: Rc::new(Handlers::new()),
        }
    }

    pub fn specs(&self) -> &ActionSpecs<I, S> {
        &self.specs
    }

    pub fn handler(&self, action: &str) -> Option<&Handler> {
        self.handlers.get(action)
    }

    /// Only computed actions can change after mount.
    pub fn should_subscribe(&self) -> bool {
        self.specs.has_dynamic()
    }

    /// Wrap `target` so it is driven by a fresh engine on mount.
    pub fn wrap<T>(&self, target: T) -> Wrapped<I, S, T> {
        Wrapped {
            actions: self.clone(),
            target,
            engine: None,
            inputs: None,
        }
    }
}

/// Inner unit that receives the wrapped unit's inputs unchanged.
pub trait Target<I> {
    fn render(&mut self, inputs: &I);
}

impl<I, F> Target<I> for F
where
    F: FnMut(&I),
{
    fn render(&mut self, inputs: &I) {
        self(inputs);
    }
}

/// Outcome of [`Wrapped::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    Rendered,
    /// Inputs equal the previous ones; the target was not re-rendered.
    Skipped,
}

/// A target bound to its own engine.
pub struct Wrapped<I, S, T> {
    actions: AutoActions<I, S>,
    target: T,
    engine: Option<Engine<I, S>>,
    inputs: Option<I>,
}

impl<I, S, T> Wrapped<I, S, T>
where
    I: Clone + PartialEq + 'static,
    S: 'static,
    T: Target<I>,
{
    /// Construct the engine, run the initial pass, render, then subscribe and
    /// drain.
    pub fn mount(
        &mut self,
        source: Rc<dyn StateSource<S>>,
        scheduler: Rc<dyn Scheduler>,
        inputs: I,
    ) -> Result<DrainReport> {
        if self.engine.is_some() {
            bail!("already mounted");
        }
        let engine = Engine::construct(self.actions.clone(), source, scheduler, inputs.clone());
        engine.on_ready()?;
        self.target.render(&inputs);
        let report = engine.on_subscribe()?;

        self.inputs = Some(inputs);
        self.engine = Some(engine);
        Ok(report)
    }

    /// Forward new inputs. Equal inputs skip the render; changed inputs are
    /// handed to the engine, rendered, and trigger a recomputation.
    ///
    /// Equality is `I`'s `PartialEq`. Owned values have no identity to compare
    /// shallowly, so nested fields are compared by value: inputs that differ
    /// only in a freshly rebuilt but equal nested value are skipped too.
    pub fn update(&mut self, inputs: I) -> Result<Render> {
        let engine = self.engine.as_ref().ok_or_else(|| anyhow!("not mounted"))?;
        if self.inputs.as_ref() == Some(&inputs) {
            return Ok(Render::Skipped);
        }

        engine.set_inputs(inputs.clone());
        self.target.render(&inputs);
        self.inputs = Some(inputs);
        engine.on_external_change()?;
        Ok(Render::Rendered)
    }

    pub fn unmount(&mut self) -> Result<()> {
        let engine = self.engine.take().ok_or_else(|| anyhow!("not mounted"))?;
        engine.on_teardown()
    }

    pub fn is_mounted(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> Option<&Engine<I, S>> {
        self.engine.as_ref()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Handler failures from recomputations since the last call.
    pub fn take_failures(&self) -> Vec<HandlerFailure> {
        self.engine
            .as_ref()
            .map(Engine::take_failures)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::ActionSpec;
    use crate::core::types::Args;
    use crate::io::scheduler::Immediate;
    use crate::io::store::Store;
    use crate::test_support::CallLog;
    use serde_json::{Value, json};

    fn load_by_id() -> ActionSpecs<Value, Value> {
        ActionSpecs::new().with(
            "load",
            ActionSpec::computed(|inputs: &Value, _state: &Value| {
                Args::seq([inputs.get("id").cloned()])
            }),
        )
    }

    #[test]
    fn missing_handler_fails_at_wrap_time() {
        let err = AutoActions::new(load_by_id(), Handlers::new()).expect_err("must fail");
        assert!(err.to_string().contains("action 'load' has no handler"), "{}", err);
    }

    #[test]
    fn stray_handler_fails_at_wrap_time() {
        let log = CallLog::new();
        let err = AutoActions::new(load_by_id(), log.handlers(["load", "save"]))
            .expect_err("must fail");
        assert!(err.to_string().contains("handler 'save' has no matching action"));
    }

    #[test]
    fn empty_config_mounts_without_subscribing() {
        let store = Store::new(json!({}));
        let actions: AutoActions<Value, Value> = AutoActions::empty();
        let mut wrapped = actions.wrap(|_: &Value| {});
        let report = wrapped
            .mount(Rc::new(store.clone()), Rc::new(Immediate), json!({}))
            .expect("mount");
        assert_eq!(report.invoked, 0);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn inputs_are_forwarded_and_equal_inputs_skip_render() {
        let log = CallLog::new();
        let store = Store::new(json!({}));
        let actions = AutoActions::new(load_by_id(), log.handlers(["load"])).expect("config");
        let mut rendered: Vec<Value> = Vec::new();
        {
            let mut wrapped = actions.wrap(|inputs: &Value| rendered.push(inputs.clone()));
            wrapped
                .mount(Rc::new(store.clone()), Rc::new(Immediate), json!({"id": 5}))
                .expect("mount");
            assert_eq!(wrapped.update(json!({"id": 5})).expect("update"), Render::Skipped);
            assert_eq!(wrapped.update(json!({"id": 7})).expect("update"), Render::Rendered);
            wrapped.unmount().expect("unmount");
            assert!(!wrapped.is_mounted());
        }

        assert_eq!(rendered, vec![json!({"id": 5}), json!({"id": 7})]);
        assert_eq!(
            log.calls(),
            vec![
                ("load".to_string(), vec![json!(5)]),
                ("load".to_string(), vec![json!(7)]),
            ]
        );
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn equal_nested_inputs_skip_render() {
        let store = Store::new(json!({}));
        let actions: AutoActions<Value, Value> = AutoActions::empty();
        let mut renders = 0;
        {
            let mut wrapped = actions.wrap(|_: &Value| renders += 1);
            wrapped
                .mount(
                    Rc::new(store.clone()),
                    Rc::new(Immediate),
                    json!({"filter": {"tags": ["a", "b"]}}),
                )
                .expect("mount");
            let rebuilt = json!({"filter": {"tags": ["a", "b"]}});
            assert_eq!(wrapped.update(rebuilt).expect("update"), Render::Skipped);
            let changed = json!({"filter": {"tags": ["a"]}});
            assert_eq!(wrapped.update(changed).expect("update"), Render::Rendered);
        }
        assert_eq!(renders, 2);
    }

    #[test]
    fn each_wrapped_instance_owns_its_engine() {
        let log = CallLog::new();
        let store = Store::new(json!({}));
        let actions = AutoActions::new(load_by_id(), log.handlers(["load"])).expect("config");
        let mut first = actions.wrap(|_: &Value| {});
        let mut second = actions.wrap(|_: &Value| {});

        first
            .mount(Rc::new(store.clone()), Rc::new(Immediate), json!({"id": 1}))
            .expect("mount first");
        second
            .mount(Rc::new(store.clone()), Rc::new(Immediate), json!({"id": 1}))
            .expect("mount second");

        // Separate queues: identical args are not deduplicated across instances.
        assert_eq!(log.count("load"), 2);
        assert_eq!(store.listener_count(), 2);
        assert!(first.mount(Rc::new(store.clone()), Rc::new(Immediate), json!({})).is_err());
    }

    #[test]
    fn update_before_mount_fails() {
        let actions: AutoActions<Value, Value> = AutoActions::empty();
        let mut wrapped = actions.wrap(|_: &Value| {});
        assert!(wrapped.update(json!({})).is_err());
        assert!(wrapped.unmount().is_err());
    }
}
