//! Configuration invariants checked once, when actions are wrapped.

use std::collections::BTreeSet;

/// Check that actions and handlers line up:
/// - No empty action names
/// - Every action has a handler
/// - Every handler belongs to an action
///
/// Violations are reported in action/handler name order.
pub fn validate_bindings<'a, A, H>(actions: A, handlers: H) -> Vec<String>
where
    A: IntoIterator<Item = &'a str>,
    H: IntoIterator<Item = &'a str>,
{
    let actions: BTreeSet<&str> = actions.into_iter().collect();
    let handlers: BTreeSet<&str> = handlers.into_iter().collect();
    let mut errors = Vec::new();

    if actions.contains("") {
        errors.push("action names must be non-empty".to_string());
    }
    for name in actions.difference(&handlers) {
        if !name.is_empty() {
            errors.push(format!("action '{}' has no handler", name));
        }
    }
    for name in handlers.difference(&actions) {
        errors.push(format!("handler '{}' has no matching action", name));
    }

    errors
}
