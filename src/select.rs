use std::cmp::Ordering;
use regex::Regex;

use crate::inject::{new_errs, slot_data, Inj, InjectOptions, Injector, Mode};
use crate::text::{pathify_parts, stringify};
use crate::validate::{validate_nested, validate_with, EXACTMETA, OPENMARK};
use crate::value::{Func, Map, Value};
use crate::walk::walk;

/// Filter the children of a container by a shape query: a child is kept
/// when validating it against the query (exact scalar matching, open maps,
/// comparator commands available) yields no errors.
pub fn select(children: &Value, query: &Value) -> Vec<Value> {
    let kids: Vec<Value> = match children {
        Value::Map(_) => children.items().into_iter().map(|(_, v)| v).collect(),
        Value::List(items) => items.clone(),
        _ => Vec::new(),
    };
    kids.into_iter()
        .filter(|child| {
            let q = ensure_open(query.clone());
            let errs = new_errs();
            let mut meta = Map::default();
            meta.insert(EXACTMETA.to_string(), Value::Bool(true));
            let opts = InjectOptions {
                errs: Some(errs.clone()),
                meta: Some(meta),
                extra: Some(comparator_commands()),
                ..Default::default()
            };
            let _ = validate_with(child.clone(), q, opts);
            let keep = errs.borrow().is_empty();
            keep
        })
        .collect()
}

/// Stamp `` `$OPEN`: true `` on every map of the (cloned) query that does
/// not set it, so unqueried keys never fail a child.
fn ensure_open(query: Value) -> Value {
    walk(query, &mut |_, mut v, _, _| {
        if let Value::Map(entries) = &mut v {
            if !entries.contains_key(OPENMARK) {
                entries.insert(OPENMARK.to_string(), Value::Bool(true));
            }
        }
        v
    })
}

fn comparator_commands() -> Map {
    let mut cmds = Map::default();
    for op in ["$GT", "$LT", "$GTE", "$LTE", "$LIKE"] {
        cmds.insert(op.to_string(), Value::Func(point_comparator(op)));
    }
    for op in ["$AND", "$OR", "$NOT"] {
        cmds.insert(op.to_string(), Value::Func(logic_comparator(op)));
    }
    cmds
}

/// Scalar comparators: in key:post the injected threshold is compared with
/// the parallel data point; success replaces the containing query map with
/// the point.
fn point_comparator(op: &'static str) -> Func {
    Func::new(move |run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str| {
        match inj.mode {
            Mode::KeyPre => Value::String(inj.key.clone()),
            Mode::Val => Value::Null,
            Mode::KeyPost => {
                let threshold = run.node(&inj.path).cloned().unwrap_or(Value::Null);
                let point = slot_data(inj);
                let p = pathify_parts(&inj.path[..inj.path.len().saturating_sub(1)], 1);
                if compare(op, &point, &threshold) {
                    run.setval(inj, point, 2);
                } else {
                    inj.err(compare_error(op, &point, &threshold, &p));
                    run.setval(inj, Value::Null, 2);
                }
                inj.halt();
                Value::String(inj.key.clone())
            }
        }
    })
}

fn compare(op: &str, point: &Value, threshold: &Value) -> bool {
    if op == "$LIKE" {
        let Value::String(pattern) = threshold else {
            return false;
        };
        return Regex::new(pattern)
            .map(|re| re.is_match(&stringify(point, None)))
            .unwrap_or(false);
    }
    let ord = match (point, threshold) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ord) = ord else {
        return false;
    };
    match op {
        "$GT" => ord == Ordering::Greater,
        "$LT" => ord == Ordering::Less,
        "$GTE" => ord != Ordering::Less,
        "$LTE" => ord != Ordering::Greater,
        _ => false,
    }
}

fn compare_error(op: &str, point: &Value, threshold: &Value, p: &str) -> String {
    let point = stringify(point, None);
    let threshold = stringify(threshold, None);
    let at = if p == "<root>" {
        String::new()
    } else {
        format!(" at field {}", p)
    };
    match op {
        "$LIKE" => format!("Value {}{} should match {}.", point, at, threshold),
        "$GT" => format!("Value {}{} should be greater than {}.", point, at, threshold),
        "$LT" => format!("Value {}{} should be less than {}.", point, at, threshold),
        "$GTE" => format!("Value {}{} should be at least {}.", point, at, threshold),
        _ => format!("Value {}{} should be at most {}.", point, at, threshold),
    }
}

/// Logical comparators: sub-queries run as nested validations of the data
/// point during key:pre, and the whole comparator subtree is consumed so
/// the engine never traverses it as a spec.
fn logic_comparator(op: &'static str) -> Func {
    Func::new(move |run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str| {
        if inj.mode != Mode::KeyPre {
            return Value::Null;
        }
        let queries = run.node(&inj.path).cloned().unwrap_or(Value::Null);
        let subs: Vec<Value> = match queries {
            Value::List(items) => items,
            other => vec![other],
        };
        let point = slot_data(inj);
        let p = pathify_parts(&inj.path[..inj.path.len().saturating_sub(1)], 1);
        let at = if p == "<root>" {
            String::new()
        } else {
            format!(" at field {}", p)
        };

        let mut failures: Vec<Vec<String>> = Vec::new();
        let mut matched: Option<Value> = None;
        for q in &subs {
            let scratch = new_errs();
            validate_nested(run, inj, point.clone(), ensure_open(q.clone()), scratch.clone());
            let errors = scratch.borrow().clone();
            if errors.is_empty() && matched.is_none() {
                matched = Some(q.clone());
            }
            failures.push(errors);
        }

        let pass = match op {
            "$AND" => failures.iter().all(|e| e.is_empty()),
            "$OR" => failures.iter().any(|e| e.is_empty()),
            _ => failures.iter().all(|e| !e.is_empty()),
        };

        if pass {
            run.setval(inj, point, 2);
        } else {
            match op {
                "$AND" => {
                    for errors in failures.iter().filter(|e| !e.is_empty()) {
                        for e in errors {
                            inj.err(e.clone());
                        }
                    }
                }
                "$OR" => inj.err(format!(
                    "Value {}{} matched no alternative.",
                    stringify(&point, None),
                    at
                )),
                _ => inj.err(format!(
                    "Value {}{} should not match {}.",
                    stringify(&point, None),
                    at,
                    stringify(&matched.unwrap_or(Value::Null), Some(47))
                )),
            }
            run.setval(inj, Value::Null, 2);
        }
        inj.halt();
        Value::Null
    })
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use super::*;

    fn v(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_select_by_shape() {
        //given
        let children = v(json!([{"a": 1, "b": 2}, {"a": 2, "b": 2}, {"a": 1, "b": 3}]));

        //when
        let out = select(&children, &v(json!({"a": 1})));

        //then
        assert_eq!(out, vec![v(json!({"a": 1, "b": 2})), v(json!({"a": 1, "b": 3}))]);
    }

    #[test]
    fn test_select_map_children() {
        //given
        let children = v(json!({"x": {"kind": "dog"}, "y": {"kind": "cat"}}));

        //when
        let out = select(&children, &v(json!({"kind": "cat"})));

        //then
        assert_eq!(out, vec![v(json!({"kind": "cat"}))]);
    }

    #[test]
    fn test_select_gt() {
        //given
        let children = v(json!([{"a": 7}, {"a": 3}, {"a": 5}]));

        //when
        let out = select(&children, &v(json!({"a": {"`$GT`": 5}})));

        //then
        assert_eq!(out, vec![v(json!({"a": 7}))]);
    }

    #[test]
    fn test_select_bounds() {
        //given
        let children = v(json!([{"n": 1}, {"n": 5}, {"n": 9}]));

        //when
        let gte = select(&children, &v(json!({"n": {"`$GTE`": 5}})));
        let lt = select(&children, &v(json!({"n": {"`$LT`": 5}})));
        let lte = select(&children, &v(json!({"n": {"`$LTE`": 5}})));

        //then
        assert_eq!(gte.len(), 2);
        assert_eq!(lt, vec![v(json!({"n": 1}))]);
        assert_eq!(lte.len(), 2);
    }

    #[test]
    fn test_select_like() {
        //given
        let children = v(json!([{"name": "alpha"}, {"name": "beta"}]));

        //when
        let out = select(&children, &v(json!({"name": {"`$LIKE`": "^al"}})));

        //then
        assert_eq!(out, vec![v(json!({"name": "alpha"}))]);
    }

    #[test]
    fn test_select_and_or_not() {
        //given
        let children = v(json!([{"a": 1}, {"a": 5}, {"a": 9}]));

        //when
        let and = select(
            &children,
            &v(json!({"a": {"`$AND`": [{"`$GT`": 2}, {"`$LT`": 8}]}})),
        );
        let or = select(
            &children,
            &v(json!({"a": {"`$OR`": [{"`$LT`": 2}, {"`$GT`": 8}]}})),
        );
        let not = select(&children, &v(json!({"a": {"`$NOT`": {"`$GT`": 2}}})));

        //then
        assert_eq!(and, vec![v(json!({"a": 5}))]);
        assert_eq!(or, vec![v(json!({"a": 1})), v(json!({"a": 9}))]);
        assert_eq!(not, vec![v(json!({"a": 1}))]);
    }

    #[test]
    fn test_select_nested_shape() {
        //given
        let children = v(json!([
            {"meta": {"tag": "x"}, "n": 1},
            {"meta": {"tag": "y"}, "n": 2}
        ]));

        //when
        let out = select(&children, &v(json!({"meta": {"tag": "y"}})));

        //then
        assert_eq!(out, vec![v(json!({"meta": {"tag": "y"}, "n": 2}))]);
    }

    #[test]
    fn test_select_no_children() {
        assert!(select(&Value::Null, &v(json!({"a": 1}))).is_empty());
        assert!(select(&v(json!("scalar")), &v(json!({"a": 1}))).is_empty());
    }
}
