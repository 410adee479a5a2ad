//! Lifecycle controller for one wrapped instance.
//!
//! An [`Engine`] owns the baseline of last applied descriptors and its own
//! dispatch queue. Hosts drive it through four calls:
//!
//! 1. [`Engine::construct`] resolves every action and records the result as
//!    the baseline (nothing is dispatched yet).
//! 2. [`Engine::on_ready`] enqueues every valid baseline descriptor.
//! 3. [`Engine::on_subscribe`] listens to the state source (only when some
//!    action is computed) and drains what `on_ready` enqueued.
//! 4. [`Engine::on_teardown`] unsubscribes; deferred work still in flight
//!    becomes a no-op.
//!
//! State notifications are turned into at most one pending recomputation on
//! the scheduler. The recomputation reads inputs and state when it runs, so
//! coalesced notifications lose nothing.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::change::changed;
use crate::core::queue::{DispatchQueue, DrainReport, HandlerFailure, QueueEntry, drain};
use crate::core::types::Descriptors;
use crate::core::validity::is_valid;
use crate::io::scheduler::Scheduler;
use crate::io::store::{StateSource, Subscription};
use crate::wrap::AutoActions;

/// Side-effecting function bound to one action. Receives the resolved
/// arguments positionally; its success value is ignored.
pub type Handler = Rc<dyn Fn(&[Value]) -> Result<()>>;

/// Handlers keyed by action name.
pub type Handlers = BTreeMap<String, Handler>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&[Value]) -> Result<()> + 'static,
{
    Rc::new(f)
}

/// Lifecycle phase of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Baseline recorded, nothing enqueued.
    Constructed,
    /// Initial pass enqueued, not yet listening.
    Ready,
    /// Listening (or deliberately not, for static configs) and drained once.
    Subscribed,
    TornDown,
}

struct EngineInner<I, S> {
    actions: AutoActions<I, S>,
    source: Rc<dyn StateSource<S>>,
    scheduler: Rc<dyn Scheduler>,
    inputs: RefCell<I>,
    baseline: RefCell<Descriptors>,
    queue: RefCell<DispatchQueue<Handler>>,
    phase: Cell<Phase>,
    alive: Cell<bool>,
    recompute_pending: Cell<bool>,
    draining: Cell<bool>,
    subscription: RefCell<Option<Subscription>>,
    failures: RefCell<Vec<HandlerFailure>>,
}

/// Reactive dispatch engine for one instance. Cheap to clone; clones share
/// state.
pub struct Engine<I, S> {
    inner: Rc<EngineInner<I, S>>,
}

impl<I, S> Clone for Engine<I, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<I, S> fmt::Debug for Engine<I, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.inner.phase.get())
            .field("baseline", &self.inner.baseline.borrow())
            .field("queued", &self.inner.queue.borrow().len())
            .field("recompute_pending", &self.inner.recompute_pending.get())
            .finish()
    }
}

impl<I: 'static, S: 'static> Engine<I, S> {
    /// Resolve every action against `inputs` and the current state and record
    /// the result as the baseline.
    pub fn construct(
        actions: AutoActions<I, S>,
        source: Rc<dyn StateSource<S>>,
        scheduler: Rc<dyn Scheduler>,
        inputs: I,
    ) -> Self {
        let state = source.state();
        let baseline = actions.specs().resolve_all(&inputs, &state);
        debug!(actions = baseline.len(), "engine constructed");

        Self {
            inner: Rc::new(EngineInner {
                actions,
                source,
                scheduler,
                inputs: RefCell::new(inputs),
                baseline: RefCell::new(baseline),
                queue: RefCell::new(DispatchQueue::new()),
                phase: Cell::new(Phase::Constructed),
                alive: Cell::new(true),
                recompute_pending: Cell::new(false),
                draining: Cell::new(false),
                subscription: RefCell::new(None),
                failures: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    /// Last applied descriptor per action.
    pub fn baseline(&self) -> Descriptors {
        self.inner.baseline.borrow().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.borrow().is_some()
    }

    pub fn is_recompute_pending(&self) -> bool {
        self.inner.recompute_pending.get()
    }

    /// Store the latest inputs. They are read by the next recomputation.
    pub fn set_inputs(&self, inputs: I) {
        *self.inner.inputs.borrow_mut() = inputs;
    }

    /// Enqueue every valid baseline descriptor, treating all of them as
    /// changed. Returns the number of entries enqueued. Nothing runs until
    /// [`Engine::on_subscribe`].
    #[instrument(skip_all)]
    pub fn on_ready(&self) -> Result<usize> {
        self.expect_phase(Phase::Constructed, "on_ready")?;
        let baseline = self.baseline();
        let enqueued = self.inner.accept(baseline, Pass::Initial);
        self.inner.phase.set(Phase::Ready);
        debug!(enqueued, "initial pass enqueued");
        Ok(enqueued)
    }

    /// Listen to the state source when any action is computed, then drain the
    /// initial pass.
    #[instrument(skip_all)]
    pub fn on_subscribe(&self) -> Result<DrainReport> {
        self.expect_phase(Phase::Ready, "on_subscribe")?;

        if self.inner.actions.should_subscribe() {
            let weak = Rc::downgrade(&self.inner);
            let subscription = self.inner.source.subscribe(Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.schedule_recompute();
                }
            }));
            *self.inner.subscription.borrow_mut() = Some(subscription);
            debug!("subscribed to state source");
        } else {
            debug!("static configuration; not subscribing");
        }
        self.inner.phase.set(Phase::Subscribed);

        Ok(self.inner.drain())
    }

    /// Schedule a recomputation for the next tick, unless one is already
    /// pending. Ignored before subscription; an error after teardown.
    pub fn on_external_change(&self) -> Result<()> {
        match self.inner.phase.get() {
            Phase::Subscribed => self.inner.schedule_recompute(),
            Phase::TornDown => bail!("on_external_change called after teardown"),
            phase => debug!(?phase, "ignoring external change before subscription"),
        }
        Ok(())
    }

    /// Unsubscribe and mark the engine dead. Calling it again is a no-op, so
    /// hosts may tear down from more than one exit path.
    #[instrument(skip_all)]
    pub fn on_teardown(&self) -> Result<()> {
        if self.inner.phase.get() == Phase::TornDown {
            debug!("engine already torn down");
            return Ok(());
        }
        self.inner.alive.set(false);
        let subscription = self.inner.subscription.borrow_mut().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            debug!("unsubscribed from state source");
        }
        self.inner.phase.set(Phase::TornDown);
        Ok(())
    }

    /// Handler failures from deferred recomputations since the last call.
    pub fn take_failures(&self) -> Vec<HandlerFailure> {
        std::mem::take(&mut *self.inner.failures.borrow_mut())
    }

    fn expect_phase(&self, expected: Phase, call: &str) -> Result<()> {
        let phase = self.inner.phase.get();
        if phase != expected {
            bail!("{} requires phase {:?}, engine is {:?}", call, expected, phase);
        }
        Ok(())
    }
}

/// Whether an accept pass bootstraps from the baseline or compares against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Initial,
    Update,
}

impl<I: 'static, S: 'static> EngineInner<I, S> {
    fn schedule_recompute(self: &Rc<Self>) {
        if !self.alive.get() {
            return;
        }
        if self.recompute_pending.replace(true) {
            debug!("recompute already pending; coalescing");
            return;
        }

        let weak: Weak<Self> = Rc::downgrade(self);
        self.scheduler.schedule(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.recompute_pending.set(false);
            if !inner.alive.get() {
                debug!("engine torn down before recompute ran");
                return;
            }
            let report = inner.recompute();
            inner.failures.borrow_mut().extend(report.failures);
        }));
    }

    /// Re-resolve against the latest inputs and state, enqueue what changed,
    /// and drain.
    fn recompute(&self) -> DrainReport {
        let state = self.source.state();
        let resolved = {
            let inputs = self.inputs.borrow();
            self.actions.specs().resolve_all(&inputs, &state)
        };

        if *self.baseline.borrow() == resolved {
            debug!("resolved descriptors match baseline");
            return DrainReport::default();
        }

        let enqueued = self.accept(resolved, Pass::Update);
        debug!(enqueued, "recompute enqueued");
        self.drain()
    }

    /// Enqueue the valid descriptors of `resolved`. On an update pass only
    /// changed descriptors qualify, and each one is written to the baseline
    /// before it is enqueued.
    fn accept(&self, resolved: Descriptors, pass: Pass) -> usize {
        let mut enqueued = 0;
        for (name, descriptor) in resolved {
            if !is_valid(&descriptor.args) {
                debug!(action = %name, args = %descriptor.args, "skipping action with unresolved arguments");
                continue;
            }

            if pass == Pass::Update {
                let mut baseline = self.baseline.borrow_mut();
                if !changed(&descriptor, baseline.get(&name)) {
                    continue;
                }
                baseline.insert(name.clone(), descriptor.clone());
            }

            let Some(handler) = self.actions.handler(&name) else {
                warn!(action = %name, "no handler bound; skipping");
                continue;
            };
            self.queue.borrow_mut().enqueue(QueueEntry {
                action: name,
                args: descriptor.args,
                key: descriptor.key,
                handler: Rc::clone(handler),
            });
            enqueued += 1;
        }
        enqueued
    }

    /// Drain the queue unless a drain is already running further up the
    /// stack. In that case the entries stay queued and the running drain
    /// picks them up in its next cycle, after the batch it is working on.
    fn drain(&self) -> DrainReport {
        if self.draining.replace(true) {
            debug!(queued = self.queue.borrow().len(), "drain already running; deferring to it");
            return DrainReport::default();
        }
        let report = drain(&self.queue, |entry| {
            (entry.handler)(&entry.args.to_call_args())
        });
        debug!(
            cycles = report.cycles,
            invoked = report.invoked,
            deduped = report.deduped,
            failures = report.failures.len(),
            "drain finished"
        );
        self.draining.set(false);
        report
    }
}
