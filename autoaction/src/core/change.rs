//! Change detection against the last applied descriptor.

use crate::core::types::ActionDescriptor;

/// True when `next` differs structurally from `prev`, or when there is no
/// previous descriptor at all.
pub fn changed(next: &ActionDescriptor, prev: Option<&ActionDescriptor>) -> bool {
    match prev {
        Some(prev) => next != prev,
        None => true,
    }
}
