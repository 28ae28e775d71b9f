use proptest::prelude::*;
use serde_json::{json, Value};

use courier_core::messaging::TaskKind;

pub fn task_kind_strategy() -> impl Strategy<Value = TaskKind> {
    prop::sample::select(TaskKind::ALL.to_vec())
}

/// Small flat JSON objects like the payloads handlers exchange
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,24}", 0..6).prop_map(|fields| {
        let object: serde_json::Map<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Value::Object(object)
    })
}

/// (base_ms, multiplier, max_ms) with max >= base
pub fn backoff_params_strategy() -> impl Strategy<Value = (u64, f64, u64)> {
    (1u64..5_000, 1.0f64..4.0, 0u64..120_000)
        .prop_map(|(base, multiplier, extra)| (base, multiplier, base + extra))
}

pub fn queue_prefix_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z][a-z0-9_]{0,10}")
}

pub fn empty_payload() -> Value {
    json!({})
}
