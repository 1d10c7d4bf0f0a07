use std::env;

/// Overrides environment detection with `browser` or `node`.
pub const FORCE_ENVIRONMENT_VAR: &str = "FIRESTORE_ORM_FORCE_ENVIRONMENT";

fn forced_environment() -> Option<String> {
    env::var(FORCE_ENVIRONMENT_VAR).ok()
}

pub fn is_node() -> bool {
    !is_browser()
}

/// Browser-like hosts are short lived and favour a short idle TTL for cached stores.
pub fn is_browser() -> bool {
    match forced_environment().as_deref() {
        Some("browser") => true,
        Some(_) => false,
        None => cfg!(target_arch = "wasm32"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn default_environment_is_node() {
        if forced_environment().is_none() {
            assert!(is_node());
            assert!(!is_browser());
        }
    }
}
