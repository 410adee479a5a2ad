//! Process exit codes of the `autoaction` binary.

pub const OK: i32 = 0;
/// Unreadable or invalid scenario, or a replay step that could not be applied.
pub const INVALID: i32 = 1;
/// `replay` ran to the end, but some handler returned an error.
pub const HANDLER_FAILED: i32 = 2;
