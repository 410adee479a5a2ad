//! Classifies resolved arguments as usable or still waiting on data.

use crate::core::types::Args;

/// False when the arguments, or any element/value inside them, is unresolved.
pub fn is_valid(args: &Args) -> bool {
    match args {
        Args::Unresolved => false,
        Args::Seq(slots) => slots.iter().all(Option::is_some),
        Args::Map(entries) => entries.values().all(Option::is_some),
        Args::Scalar(_) => true,
    }
}
