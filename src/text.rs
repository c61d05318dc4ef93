use std::sync::OnceLock;
use regex::Regex;
use crate::value::{iskey, Key, Value};

/// Human-friendly rendering: compact sorted-key JSON with the quotes
/// stripped, optionally truncated to `max` characters (an `...` marker is
/// used when `max` leaves room for it).
pub fn stringify(val: &Value, max: Option<usize>) -> String {
    let mut out: String = compact(val).chars().filter(|c| *c != '"').collect();
    if let Some(max) = max {
        if out.chars().count() > max {
            if max > 3 {
                out = out.chars().take(max - 3).collect();
                out.push_str("...");
            } else {
                out = out.chars().take(max).collect();
            }
        }
    }
    out
}

/// Deterministic compact JSON: sorted map keys, no whitespace. Functions
/// and non-finite numbers render as `null`.
pub(crate) fn compact(val: &Value) -> String {
    match val {
        Value::Null | Value::Func(_) => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.as_f64().is_finite() {
                n.to_string()
            } else {
                "null".to_string()
            }
        }
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(compact).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Map(_) => {
            let parts: Vec<String> = val
                .items()
                .iter()
                .map(|(k, v)| {
                    format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), compact(v))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Deterministic pretty JSON with two-space indentation.
pub fn jsonify(val: &Value) -> String {
    jsonify_with(val, 2, 0)
}

/// Deterministic pretty JSON. `indent` is the per-level step; `offset`
/// left-pads every continuation line, so the result can be spliced into an
/// already-indented context.
pub fn jsonify_with(val: &Value, indent: usize, offset: usize) -> String {
    let mut out = String::new();
    write_pretty(val, indent, 0, &mut out);
    if offset == 0 {
        return out;
    }
    let pad: String = " ".repeat(offset);
    let mut lines = out.lines();
    let mut shifted = lines.next().unwrap_or_default().to_string();
    for line in lines {
        shifted.push('\n');
        shifted.push_str(&pad);
        shifted.push_str(line);
    }
    shifted
}

fn write_pretty(val: &Value, indent: usize, level: usize, out: &mut String) {
    match val {
        Value::List(items) if !items.is_empty() => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('\n');
                out.push_str(&" ".repeat(indent * (level + 1)));
                write_pretty(item, indent, level + 1, out);
            }
            out.push('\n');
            out.push_str(&" ".repeat(indent * level));
            out.push(']');
        }
        Value::List(_) => out.push_str("[]"),
        Value::Map(entries) if !entries.is_empty() => {
            out.push('{');
            for (i, (k, v)) in val.items().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('\n');
                out.push_str(&" ".repeat(indent * (level + 1)));
                out.push_str(&serde_json::to_string(k).unwrap_or_default());
                out.push_str(": ");
                write_pretty(v, indent, level + 1, out);
            }
            out.push('\n');
            out.push_str(&" ".repeat(indent * level));
            out.push('}');
        }
        Value::Map(_) => out.push_str("{}"),
        other => out.push_str(&compact(other)),
    }
}

/// Escape regex metacharacters.
pub fn escre(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '.' | '*' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a URL component.
pub fn escurl(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn slash_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([^/:])/+").expect("valid slash pattern"))
}

/// Join URL parts with single slashes. Empty parts are dropped, duplicate
/// slashes inside a part collapse (protocol separators survive), middle
/// parts lose their leading and trailing slashes, the first part keeps its
/// leading slashes and only loses trailing ones.
pub fn joinurl(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| {
            let collapsed = slash_runs().replace_all(s, "$1/");
            if i == 0 {
                collapsed.trim_end_matches('/').to_string()
            } else {
                collapsed.trim_matches('/').to_string()
            }
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Pad to `width` characters: positive widths left-justify, negative widths
/// right-justify.
pub fn pad(s: &str, width: i64, ch: char) -> String {
    let len = s.chars().count() as i64;
    let fill = (width.abs() - len).max(0) as usize;
    let filler: String = std::iter::repeat(ch).take(fill).collect();
    if width < 0 {
        format!("{}{}", filler, s)
    } else {
        format!("{}{}", s, filler)
    }
}

/// Render a path value as a dotted string, dropping `start` leading and
/// `end` trailing segments. An empty path is `<root>`; a value that is not
/// a path renders as an `<unknown-path: …>` marker.
pub fn pathify(val: &Value, start: usize, end: usize) -> String {
    let parts: Option<Vec<String>> = match val {
        Value::List(items) => Some(
            items
                .iter()
                .filter_map(|v| Key::from_value(v).map(|k| k.text()))
                .collect(),
        ),
        v if iskey(v) => Key::from_value(v).map(|k| vec![k.text()]),
        _ => None,
    };
    match parts {
        Some(parts) => {
            let hi = parts.len().saturating_sub(end);
            let path = parts[start.min(hi)..hi].join(".");
            if path.is_empty() {
                "<root>".to_string()
            } else {
                path
            }
        }
        None => match val {
            Value::Null => "<unknown-path>".to_string(),
            other => format!("<unknown-path: {}>", stringify(other, Some(47))),
        },
    }
}

/// [`pathify`] over the engine's internal key-path form, dropping the
/// `$TOP` holder key.
pub(crate) fn pathify_parts(parts: &[String], start: usize) -> String {
    let path = parts[start.min(parts.len())..].join(".");
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use super::*;

    #[test]
    fn test_stringify() {
        //given
        let val = Value::from(json!({"b": 1, "a": [true, "x"]}));

        //then
        assert_eq!(stringify(&val, None), "{a:[true,x],b:1}");
        assert_eq!(stringify(&val, Some(8)), "{a:[t...");
        assert_eq!(stringify(&Value::from("ab"), Some(2)), "ab");
    }

    #[test]
    fn test_jsonify_sorted_and_stable() {
        //given
        let val = Value::from(json!({"b": [1], "a": 2}));

        //then
        assert_eq!(jsonify(&val), "{\n  \"a\": 2,\n  \"b\": [\n    1\n  ]\n}");
    }

    #[test]
    fn test_jsonify_offset_pads_continuations() {
        //given
        let val = Value::from(json!({"a": 1}));

        //when
        let out = jsonify_with(&val, 2, 4);

        //then
        assert_eq!(out, "{\n      \"a\": 1\n    }");
    }

    #[test]
    fn test_jsonify_roundtrip() {
        //given
        let val = Value::from(json!({"b": [1, {"x": null}], "a": "s"}));

        //when
        let text = jsonify(&val);
        let back: serde_json::Value = serde_json::from_str(&text).expect("valid json");

        //then
        assert_eq!(jsonify(&Value::from(back)), text);
    }

    #[test]
    fn test_escre() {
        assert_eq!(escre("a.b*c"), "a\\.b\\*c");
        assert_eq!(escre("plain"), "plain");
    }

    #[test]
    fn test_escurl() {
        assert_eq!(escurl("a b&c"), "a%20b%26c");
    }

    #[test]
    fn test_joinurl() {
        assert_eq!(
            joinurl(&["http://example.com/", "", "a//b", "/c/"]),
            "http://example.com/a/b/c"
        );
        assert_eq!(joinurl(&["/root/", "x"]), "/root/x");
        assert_eq!(joinurl(&[]), "");
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad("ab", 4, ' '), "ab  ");
        assert_eq!(pad("ab", -4, '0'), "00ab");
        assert_eq!(pad("abcd", 2, ' '), "abcd");
    }

    #[test]
    fn test_pathify() {
        assert_eq!(pathify(&Value::from(json!(["$TOP", "a", "b"])), 1, 0), "a.b");
        assert_eq!(pathify(&Value::from(json!([])), 0, 0), "<root>");
        assert_eq!(pathify(&Value::from(json!(["a", "b"])), 0, 1), "a");
        assert_eq!(pathify(&Value::from(json!({"x": 1})), 0, 0), "<unknown-path: {x:1}>");
    }
}
