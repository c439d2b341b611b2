//! Per-request log field bag.
//!
//! Fields set here are inherited by every record emitted on the same
//! logical request, without passing them to each call.

use std::future::Future;

use serde_json::{Map, Value};

use crate::ambient::{self, Ambient, Scoped};

/// Add `key` to the current request's field bag.
pub fn set_context(key: impl Into<String>, value: impl Into<Value>) {
    ambient::set_field(key.into(), value.into());
}

/// A copy of the current request's field bag.
pub fn get_context() -> Map<String, Value> {
    ambient::fields()
}

pub fn clear_context() {
    ambient::clear_fields();
}

/// Run `fut` with the caller's field bag extended by `fields`.
pub fn with_log_context<F: Future>(fields: &[(&str, Value)], fut: F) -> Scoped<F> {
    let ambient = fields
        .iter()
        .fold(Ambient::capture(), |ambient, (key, value)| {
            ambient.with_field(*key, value.clone())
        });
    Scoped::new(ambient, fut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_clear() {
        clear_context();
        set_context("request_id", "r-1");
        set_context("attempt", 2);
        let bag = get_context();
        assert_eq!(bag.get("request_id"), Some(&json!("r-1")));
        assert_eq!(bag.get("attempt"), Some(&json!(2)));
        clear_context();
        assert!(get_context().is_empty());
    }

    #[test]
    fn test_with_log_context_is_scoped() {
        clear_context();
        let seen = tokio_test::block_on(with_log_context(&[("tenant", json!("acme"))], async {
            get_context()
        }));
        assert_eq!(seen.get("tenant"), Some(&json!("acme")));
        assert!(get_context().is_empty());
    }
}
