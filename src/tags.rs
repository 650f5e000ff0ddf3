use tracing::warn;

use crate::config::MetricSpec;
use crate::record::Record;

/// Builds the `key:value` tags attached to the metric emitted for `record`.
///
/// Dynamic tags come first, in configured order, followed by the static tags. A dynamic
/// tag whose field is absent, blank, or not a string is skipped; the non-string case is
/// reported as a warning.
pub fn extract_tags(spec: &MetricSpec, record: &Record) -> Vec<String> {
    let mut tags = Vec::with_capacity(spec.dynamic_tags().len() + spec.static_tags().len());

    for name in spec.dynamic_tags() {
        let Some(value) = record.get(name) else {
            continue;
        };
        match value.as_text() {
            Some(text) if text.trim().is_empty() => {}
            Some(text) => tags.push(format!("{name}:{text}")),
            None => warn!(
                tag = %name,
                value_type = value.type_name(),
                "dynamic tag is not a string"
            ),
        }
    }

    for (key, value) in spec.static_tags() {
        tags.push(format!("{key}:{value}"));
    }

    tags
}
