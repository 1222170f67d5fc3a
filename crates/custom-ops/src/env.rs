use std::env;

pub(crate) const ON_DUPLICATE_VAR: &str = "CUSTOM_OPS_ON_DUPLICATE";
pub(crate) const CHECK_GRAD_NAMES_VAR: &str = "CUSTOM_OPS_CHECK_GRAD_NAMES";

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Returns the trimmed value of `key` when it is set and non-empty.
pub(crate) fn non_empty_var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}
