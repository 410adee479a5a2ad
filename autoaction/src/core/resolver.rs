//! Argument resolution: turns static action specs plus current inputs and
//! state into concrete descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::core::types::{ActionDescriptor, Args, Descriptors, Key};

/// Computes arguments from `(inputs, state)`.
pub type ArgsFn<I, S> = Rc<dyn Fn(&I, &S) -> Args>;

/// Computes the dedup key from `(inputs, state)`.
pub type KeyFn<I, S> = Rc<dyn Fn(&I, &S) -> Key>;

/// How one action computes its arguments.
pub enum ActionSpec<I, S> {
    /// Fixed arguments; never depends on inputs or state.
    Literal(Args),
    /// Arguments computed from inputs and state, no key.
    Computed(ArgsFn<I, S>),
    /// Arguments and a dedup key, each computed from inputs and state.
    Keyed { args: ArgsFn<I, S>, key: KeyFn<I, S> },
}

impl<I, S> ActionSpec<I, S> {
    pub fn literal(args: Args) -> Self {
        ActionSpec::Literal(args)
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&I, &S) -> Args + 'static,
    {
        ActionSpec::Computed(Rc::new(f))
    }

    pub fn keyed<F, K>(args: F, key: K) -> Self
    where
        F: Fn(&I, &S) -> Args + 'static,
        K: Fn(&I, &S) -> Key + 'static,
    {
        ActionSpec::Keyed {
            args: Rc::new(args),
            key: Rc::new(key),
        }
    }

    /// True when the action reads inputs or state.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, ActionSpec::Literal(_))
    }

    pub fn resolve(&self, inputs: &I, state: &S) -> ActionDescriptor {
        match self {
            ActionSpec::Literal(args) => ActionDescriptor::unkeyed(args.clone()),
            ActionSpec::Computed(args) => ActionDescriptor::unkeyed(args(inputs, state)),
            ActionSpec::Keyed { args, key } => {
                ActionDescriptor::new(args(inputs, state), key(inputs, state))
            }
        }
    }
}

impl<I, S> Clone for ActionSpec<I, S> {
    fn clone(&self) -> Self {
        match self {
            ActionSpec::Literal(args) => ActionSpec::Literal(args.clone()),
            ActionSpec::Computed(args) => ActionSpec::Computed(Rc::clone(args)),
            ActionSpec::Keyed { args, key } => ActionSpec::Keyed {
                args: Rc::clone(args),
                key: Rc::clone(key),
            },
        }
    }
}

impl<I, S> fmt::Debug for ActionSpec<I, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSpec::Literal(args) => f.debug_tuple("Literal").field(args).finish(),
            ActionSpec::Computed(_) => f.write_str("Computed(..)"),
            ActionSpec::Keyed { .. } => f.write_str("Keyed { .. }"),
        }
    }
}

/// The full action configuration, keyed by action name.
///
/// Names are fixed once built; resolution always yields exactly one
/// descriptor per configured name.
pub struct ActionSpecs<I, S> {
    specs: BTreeMap<String, ActionSpec<I, S>>,
}

impl<I, S> ActionSpecs<I, S> {
    pub fn new() -> Self {
        Self {
            specs: BTreeMap::new(),
        }
    }

    /// Add an action. A repeated name replaces the earlier spec.
    pub fn with(mut self, name: impl Into<String>, spec: ActionSpec<I, S>) -> Self {
        self.specs.insert(name.into(), spec);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// True when at least one action reads inputs or state, i.e. the engine
    /// has a reason to listen for external changes.
    pub fn has_dynamic(&self) -> bool {
        self.specs.values().any(ActionSpec::is_dynamic)
    }

    /// Resolve every configured action against `inputs` and `state`.
    pub fn resolve_all(&self, inputs: &I, state: &S) -> Descriptors {
        self.specs
            .iter()
            .map(|(name, spec)| (name.clone(), spec.resolve(inputs, state)))
            .collect()
    }
}

impl<I, S> Default for ActionSpecs<I, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, S> Clone for ActionSpecs<I, S> {
    fn clone(&self) -> Self {
        Self {
            specs: self.specs.clone(),
        }
    }
}

impl<I, S> fmt::Debug for ActionSpecs<I, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.specs.iter()).finish()
    }
}
