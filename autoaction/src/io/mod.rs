//! Collaborators with side effects: the observed state source, the deferred
//! scheduler, and scenario files on disk.

pub mod scenario;
pub mod scheduler;
pub mod store;
