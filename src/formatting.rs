// <METRIC_NAME>:<VALUE>|<TYPE>|@<SAMPLE_RATE>|#<TAG_KEY_1>:<TAG_VALUE_1>,<TAG_2>
//
// One line per emission, terminated with '\n' so that lines can be packed into datagrams.

/// Replaces the characters that would break the datagram framing of a metric name.
pub fn sanitize_metric_name(name: &str) -> String {
    replace_chars(name, invalid_metric_name_character)
}

/// Replaces the characters that would break the datagram framing of a tag.
pub fn sanitize_tag(tag: &str) -> String {
    replace_chars(tag, invalid_tag_character)
}

/// Replaces the characters that would break the datagram framing of a set member.
pub fn sanitize_set_member(member: &str) -> String {
    replace_chars(member, invalid_value_character)
}

fn replace_chars(input: &str, is_invalid: fn(char) -> bool) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if is_invalid(c) {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// Appends one metric line to `buffer`.
///
/// The namespace is joined to the name with a `.` unless it already ends with one. The
/// sample rate is only written when it is below 1.
pub fn write_metric_line<T>(
    buffer: &mut String,
    namespace: Option<&str>,
    name: &str,
    mtype: &str,
    tags: &[String],
    value: T,
    sample_rate: f64,
) where
    T: std::fmt::Display,
{
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        buffer.push_str(sanitize_metric_name(ns).as_str());
        if !ns.ends_with('.') {
            buffer.push('.');
        }
    }
    buffer.push_str(sanitize_metric_name(name).as_str());

    buffer.push(':');
    buffer.push_str(value.to_string().as_str());
    buffer.push('|');
    buffer.push_str(mtype);

    if sample_rate < 1.0 {
        buffer.push_str("|@");
        buffer.push_str(sample_rate.to_string().as_str());
    }

    if !tags.is_empty() {
        buffer.push_str("|#");

        let mut first = true;
        for tag in tags {
            if first {
                first = false;
            } else {
                buffer.push(',');
            }
            buffer.push_str(sanitize_tag(tag).as_str());
        }
    }

    buffer.push('\n');
}

#[inline]
fn invalid_value_character(c: char) -> bool {
    c == '|' || c == '\n' || c == '\r'
}

#[inline]
fn invalid_metric_name_character(c: char) -> bool {
    invalid_value_character(c) || c == ':' || c == '@'
}

#[inline]
fn invalid_tag_character(c: char) -> bool {
    invalid_value_character(c) || c == ','
}
