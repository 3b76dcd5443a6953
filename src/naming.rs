// src/naming.rs

//! Mapping of public topic names and KV keys onto wire subjects.
//!
//! Public topics live under the `in` namespace on the wire; KV keys live under
//! a store prefix. In both cases a leading `/` in the caller's name is treated
//! as already rooted, so no second separator is inserted.

/// Namespace that every public topic is published under.
pub const TOPIC_NAMESPACE: &str = "in";

/// Key prefix of the primary KV store.
pub const DEFAULT_PREFIX: &str = "kvstore";

/// Key prefix of the replicated KV store variant.
pub const REPLICATED_PREFIX: &str = "kvstore_replicated";

/// Join `name` under `root`, inserting a `/` only when `name` lacks one.
fn rooted(root: &str, name: &str) -> String {
    // ---
    if name.starts_with('/') {
        format!("{root}{name}")
    } else {
        format!("{root}/{name}")
    }
}

/// Wire subject of a public topic.
///
/// `"/pose"` maps to `"in/pose"` and `"pose"` maps to `"in/pose"`.
pub fn wire_topic(topic: &str) -> String {
    rooted(TOPIC_NAMESPACE, topic)
}

/// Wire key of `key` inside the store rooted at `prefix`.
pub fn wire_key(prefix: &str, key: &str) -> String {
    rooted(prefix, key)
}
