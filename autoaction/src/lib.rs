//! Declarative, change-driven action dispatch.
//!
//! Actions are declared as functions of external inputs and observed state.
//! The engine resolves their arguments, calls each action's handler only when
//! the resolved arguments actually change, and batches handler calls so that
//! handlers which feed back into the observed state cannot loop or pile up.
//!
//! - **[`core`]**: Pure, deterministic logic (resolution, validity, change
//!   detection, the batch queue). No I/O, fully testable in isolation.
//! - **[`io`]**: Collaborators with side effects (state source, scheduler,
//!   scenario files). Isolated behind traits so tests can script them.
//!
//! [`engine`] drives the lifecycle of one instance, [`wrap`] is the
//! host-facing surface, and [`replay`] runs scripted scenarios for the CLI.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod replay;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod wrap;

pub use crate::core::resolver::{ActionSpec, ActionSpecs};
pub use crate::core::types::{ActionDescriptor, Args, Key};
pub use crate::engine::{Engine, Handler, Handlers, Phase, handler};
pub use crate::io::scheduler::{Immediate, Scheduler, TickScheduler};
pub use crate::io::store::{StateSource, Store, Subscription};
pub use crate::wrap::{AutoActions, Render, Target, Wrapped};
