//! InfluxDB line protocol serialization
//!
//! `measurement[,tag=value...] field=value[,field=value...] timestamp`

use std::fmt::Write;

use crate::encoder::{EncodedPoint, WireValue};

/// Characters escaped in measurement names
pub const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
/// Characters escaped in tag keys, tag values and field keys
pub const KEY_SPECIAL: &[char] = &[',', '=', ' '];

/// Check that `s` survives escaping with `special`, returning the problem
/// if it does not.
///
/// A line break ends the point early, and a backslash in front of an
/// escaped character (or at the very end) swallows the delimiter after it.
/// Either way the store rejects the whole write.
pub fn unwritable(s: &str, special: &[char]) -> Option<&'static str> {
    if s.contains(|c| c == '\n' || c == '\r') {
        return Some("contains a line break");
    }

    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            continue;
        }
        match chars.peek() {
            None => return Some("ends with a backslash"),
            Some(next) if special.contains(next) => {
                return Some("has a backslash before a delimiter")
            }
            Some(_) => {}
        }
    }
    None
}

/// Append one point, without a trailing newline.
///
/// Text is escaped but not validated; the encoder only produces points
/// that pass [`unwritable`].
pub fn write_point(buf: &mut String, point: &EncodedPoint) {
    escape_into(buf, &point.measurement, MEASUREMENT_SPECIAL);

    for (key, value) in point.tags.iter() {
        buf.push(',');
        escape_into(buf, key, KEY_SPECIAL);
        buf.push('=');
        escape_into(buf, value, KEY_SPECIAL);
    }

    buf.push(' ');
    for (i, (key, value)) in point.fields.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        escape_into(buf, key, KEY_SPECIAL);
        buf.push('=');
        write_value(buf, value);
    }

    buf.push(' ');
    let _ = write!(buf, "{}", point.timestamp);
}

/// Render a batch of points separated by newlines
pub fn encode_batch(points: &[EncodedPoint]) -> String {
    let mut buf = String::with_capacity(points.len() * 64);
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            buf.push('\n');
        }
        write_point(&mut buf, point);
    }
    buf
}

fn write_value(buf: &mut String, value: &WireValue) {
    match value {
        WireValue::Float(f) => {
            let _ = write!(buf, "{}", f);
        }
        WireValue::Integer(i) => {
            let _ = write!(buf, "{}i", i);
        }
        WireValue::Boolean(b) => buf.push_str(if *b { "true" } else { "false" }),
        WireValue::String(s) => {
            buf.push('"');
            escape_into(buf, s, &['"', '\\']);
            buf.push('"');
        }
    }
}

fn escape_into(buf: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            buf.push('\\');
        }
        buf.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagSet;
    use std::collections::BTreeMap;

    fn point(tags: &[(&str, &str)], fields: Vec<(&str, WireValue)>) -> EncodedPoint {
        EncodedPoint {
            measurement: "storm-cpu".to_string(),
            tags: TagSet::from_pairs(tags.iter().copied()).unwrap(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
            timestamp: 1_634_567_890_000_000_000,
        }
    }

    #[test]
    fn test_simple_line() {
        let p = point(&[("host", "a")], vec![("value", WireValue::Float(0.5))]);
        assert_eq!(p.to_line(), "storm-cpu,host=a value=0.5 1634567890000000000");
    }

    #[test]
    fn test_value_kinds() {
        let p = point(
            &[],
            vec![
                ("b", WireValue::Boolean(true)),
                ("i", WireValue::Integer(-3)),
                ("s", WireValue::String("say \"hi\" \\o/".to_string())),
            ],
        );
        assert_eq!(
            p.to_line(),
            r#"storm-cpu b=true,i=-3i,s="say \"hi\" \\o/" 1634567890000000000"#
        );
    }

    #[test]
    fn test_escaping() {
        let mut p = point(
            &[("data center", "eu,west"), ("k=1", "v")],
            vec![("field key", WireValue::Integer(1))],
        );
        p.measurement = "disk usage,total".to_string();

        assert_eq!(
            p.to_line(),
            r"disk\ usage\,total,data\ center=eu\,west,k\=1=v field\ key=1i 1634567890000000000"
        );
    }

    #[test]
    fn test_unwritable_text() {
        assert_eq!(unwritable("eu-west", KEY_SPECIAL), None);
        assert_eq!(unwritable(r"C:\temp", KEY_SPECIAL), None);
        assert_eq!(unwritable("a\nb", KEY_SPECIAL), Some("contains a line break"));
        assert_eq!(unwritable("a\rb", MEASUREMENT_SPECIAL), Some("contains a line break"));
        assert_eq!(unwritable("a\\", KEY_SPECIAL), Some("ends with a backslash"));
        assert_eq!(
            unwritable(r"a\,b", KEY_SPECIAL),
            Some("has a backslash before a delimiter")
        );
        assert_eq!(unwritable(r"a\=b", MEASUREMENT_SPECIAL), None);
    }

    #[test]
    fn test_inner_backslash_written_verbatim() {
        let p = point(&[("path", r"C:\temp")], vec![("value", WireValue::Integer(1))]);
        assert_eq!(p.to_line(), r"storm-cpu,path=C:\temp value=1i 1634567890000000000");
    }

    #[test]
    fn test_batch_is_newline_separated() {
        let a = point(&[], vec![("value", WireValue::Integer(1))]);
        let b = point(&[], vec![("value", WireValue::Integer(2))]);
        let body = encode_batch(&[a, b]);
        assert_eq!(body.lines().count(), 2);
        assert!(!body.ends_with('\n'));
    }
}
