//! User-supplied map/reduce applications.
//!
//! Dynamic loading of user code is out of scope for the core (see
//! spec Non-goals); `--app <name>` selects from this small built-in
//! registry instead of loading a shared object.

use crate::mr::types::KeyValue;

pub type MapFn = fn(&str, &str) -> Vec<KeyValue>;
pub type ReduceFn = fn(&str, &[String]) -> String;

/// Classic word-count: one `(word, "1")` pair per token, reduced by count.
pub mod wordcount {
    use super::KeyValue;

    pub fn map(_input_name: &str, content: &str) -> Vec<KeyValue> {
        content
            .split_whitespace()
            .map(|word| KeyValue::new(word, "1"))
            .collect()
    }

    pub fn reduce(_key: &str, values: &[String]) -> String {
        values.len().to_string()
    }
}

/// Resolves an `--app` name to its map/reduce function pair.
pub fn load_app(name: &str) -> Option<(MapFn, ReduceFn)> {
    match name {
        "wordcount" | "wc" => Some((wordcount::map as MapFn, wordcount::reduce as ReduceFn)),
        _ => None,
    }
}
