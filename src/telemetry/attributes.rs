//! Attribute hygiene shared by spans and measurements.
//!
//! The OTLP JSON mapping has no representation for NaN or infinity, and a
//! single such value makes the collector reject the whole request. Float
//! attributes are therefore checked before they enter the pipeline.

use std::borrow::Cow;

use opentelemetry::{Array, KeyValue, Value};

/// Whether an attribute can be exported as-is.
pub fn is_exportable(kv: &KeyValue) -> bool {
    match &kv.value {
        Value::F64(v) => v.is_finite(),
        Value::Array(Array::F64(values)) => values.iter().all(|v| v.is_finite()),
        _ => true,
    }
}

/// `attributes` without the entries [`is_exportable`] rejects. Borrows when
/// nothing had to be dropped.
pub fn sanitize(attributes: &[KeyValue]) -> Cow<'_, [KeyValue]> {
    if attributes.iter().all(is_exportable) {
        return Cow::Borrowed(attributes);
    }
    let kept: Vec<KeyValue> = attributes.iter().filter(|kv| is_exportable(kv)).cloned().collect();
    tracing::debug!(
        dropped = attributes.len() - kept.len(),
        "Dropping non-finite float attributes"
    );
    Cow::Owned(kept)
}

/// Order-independent form of an attribute list: exportable entries only,
/// sorted by key, a later duplicate key replacing the earlier value.
pub(crate) fn normalize(attributes: &[KeyValue]) -> Vec<KeyValue> {
    let mut out: Vec<KeyValue> = Vec::with_capacity(attributes.len());
    for kv in attributes.iter().filter(|kv| is_exportable(kv)) {
        match out.iter_mut().find(|existing| existing.key == kv.key) {
            Some(slot) => *slot = kv.clone(),
            None => out.push(kv.clone()),
        }
    }
    out.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
    out
}
