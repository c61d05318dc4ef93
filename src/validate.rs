use std::rc::Rc;

use crate::error::{Error, Result};
use crate::inject::{
    new_errs, slot_data, subinject, Errs, Inj, InjectOptions, Injector, Mode, Modify, TOP,
};
use crate::text::{pathify_parts, stringify};
use crate::transform::transform_with;
use crate::value::{Func, Map, Value};

pub(crate) const OPENMARK: &str = "`$OPEN`";
pub(crate) const EXACTMETA: &str = "$EXACT";

/// Check `data` against the by-example `spec`, filling defaults, and return
/// the reconciled structure. Raises [`Error::InvalidData`] when problems
/// were found; supply an error collector through [`validate_with`] to
/// inspect them instead.
pub fn validate(data: Value, spec: Value) -> Result<Value> {
    validate_with(data, spec, InjectOptions::default())
}

pub fn validate_with(data: Value, spec: Value, opts: InjectOptions) -> Result<Value> {
    let caller_errs = opts.errs.clone();
    let errs = caller_errs.clone().unwrap_or_else(new_errs);

    let mut extra = validator_commands();
    if let Some(user) = &opts.extra {
        for (k, v) in user {
            extra.insert(k.clone(), v.clone());
        }
    }

    let user_modify = opts.modify.clone();
    let modify: Modify = Rc::new(move |run, inj, val| {
        validate_modify(run, inj, val);
        if let Some(m) = &user_modify {
            let cur = run.node(&inj.path).cloned().unwrap_or(Value::Null);
            (**m)(run, inj, &cur);
        }
    });

    let run_opts = InjectOptions {
        extra: Some(extra),
        modify: Some(modify),
        errs: Some(errs.clone()),
        ..opts
    };
    let out = transform_with(data, spec, run_opts);

    if caller_errs.is_none() && !errs.borrow().is_empty() {
        return Err(Error::InvalidData(errs.borrow().join(" | ")));
    }
    Ok(out)
}

pub(crate) fn validator_commands() -> Map {
    let mut cmds = Map::default();
    for (name, expected) in [
        ("$STRING", "string"),
        ("$NUMBER", "number"),
        ("$BOOLEAN", "boolean"),
        ("$OBJECT", "object"),
        ("$ARRAY", "array"),
        ("$FUNCTION", "function"),
    ] {
        cmds.insert(name.to_string(), Value::Func(typecheck(expected)));
    }
    cmds.insert(
        "$ANY".to_string(),
        Value::Func(Func::new(|_, inj, _, _| {
            if inj.mode != Mode::Val {
                return Value::String(inj.key.clone());
            }
            inj.dparent
                .get_prop(inj.key.as_str())
                .cloned()
                .unwrap_or(Value::Null)
        })),
    );
    cmds.insert("$CHILD".to_string(), Value::Func(Func::new(cmd_child)));
    cmds.insert("$ONE".to_string(), Value::Func(Func::new(cmd_one)));
    cmds.insert("$EXACT".to_string(), Value::Func(Func::new(cmd_exact)));
    cmds
}

fn typecheck(expected: &'static str) -> Func {
    Func::new(move |run, inj, _val, _ref| {
        if inj.mode != Mode::Val {
            return Value::String(inj.key.clone());
        }
        // A data parent of another kind means the container itself
        // mismatches; its own reconciliation reports that, once.
        let parent_path = &inj.path[..inj.path.len().saturating_sub(1)];
        let parent = run.node(parent_path).cloned().unwrap_or(Value::Null);
        if parent.typify() != inj.dparent.typify() {
            return Value::Null;
        }
        let dval = inj
            .dparent
            .get_prop(inj.key.as_str())
            .cloned()
            .unwrap_or(Value::Null);
        let p = pathify_parts(&inj.path, 1);
        if dval.typify() != expected {
            inj.err(type_error(&p, expected, &dval));
            return Value::Null;
        }
        if expected == "string" && dval == Value::String(String::new()) {
            inj.err(if p == "<root>" {
                "Expected a non-empty string.".to_string()
            } else {
                format!("Expected field {} to be a non-empty string.", p)
            });
            return Value::Null;
        }
        dval
    })
}

fn type_error(p: &str, expected: &str, found: &Value) -> String {
    if p == "<root>" {
        format!(
            "Expected {}, but found {}: {}.",
            expected,
            found.typify(),
            stringify(found, None)
        )
    } else {
        format!(
            "Expected field {} to be {}, but found {}: {}.",
            p,
            expected,
            found.typify(),
            stringify(found, None)
        )
    }
}

/// `$CHILD` — apply a child template to every element of the parallel data
/// container. The map form expands the spec in place and lets the normal
/// traversal validate the new entries; the list form rebuilds the spec list
/// to the data's length and validates via a sub-injection.
fn cmd_child(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    const MARK: &str = "`$CHILD`";
    match inj.mode {
        Mode::KeyPre => {
            let parent_path = inj.path[..inj.path.len().saturating_sub(1)].to_vec();
            let parent = run.node(&parent_path).cloned().unwrap_or(Value::Null);
            let template = parent.get_prop(MARK).cloned().unwrap_or(Value::Null);
            let data = slot_data(inj);
            if !data.is_map() {
                let p = pathify_parts(&parent_path, 1);
                inj.err(type_error(&p, "object", &data));
                run.set_at(&parent_path, Value::Null);
                inj.halt();
                return Value::Null;
            }

            let mut expanded = parent.clone();
            expanded.del_prop(MARK);
            let mut fresh = Vec::new();
            for k in data.keys_of() {
                if expanded.get_prop(k.as_str()).is_none() {
                    expanded.set_prop(k.as_str(), template.clone());
                    fresh.push(k);
                }
            }
            run.set_at(&parent_path, expanded);

            // Queue the new keys right after this one; already-visited and
            // still-pending siblings keep their places.
            let mut keys = inj.keys[..=inj.key_i.min(inj.keys.len().saturating_sub(1))].to_vec();
            fresh.retain(|k| !inj.keys.contains(k));
            keys.extend(fresh);
            keys.extend(inj.keys[inj.key_i + 1..].iter().cloned());
            inj.keys = keys;
            Value::Null
        }
        Mode::Val => {
            let parent_path = inj.path[..inj.path.len().saturating_sub(1)].to_vec();
            let parent = run.node(&parent_path).cloned().unwrap_or(Value::Null);
            let template = parent.get_prop(1i64).cloned().unwrap_or(Value::Null);
            let data = inj.dparent.clone();
            if !data.is_list() {
                let p = pathify_parts(&parent_path, 1);
                inj.err(type_error(&p, "array", &data));
                run.setval(inj, Value::Null, 2);
                inj.halt();
                return Value::Null;
            }
            let clones: Vec<Value> = (0..data.size()).map(|_| template.clone()).collect();
            let mut holder = Map::default();
            holder.insert(TOP.to_string(), data);
            let out = subinject(run, Value::List(clones), Value::Map(holder), inj);
            let first = out.get_prop(0i64).cloned().unwrap_or(Value::Null);
            run.setval(inj, out, 2);
            inj.halt();
            first
        }
        Mode::KeyPost => Value::Null,
    }
}

/// `$ONE` — alternation: the first alternative that validates cleanly wins
/// and its reconciled value replaces the containing list.
fn cmd_one(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        return Value::String(inj.key.clone());
    }
    let parent_path = inj.path[..inj.path.len().saturating_sub(1)].to_vec();
    let parent = run.node(&parent_path).cloned().unwrap_or(Value::Null);
    let p = pathify_parts(&parent_path, 1);

    if inj.key != "0" {
        inj.err(format!(
            "The $ONE validator at {} must be the first element of its list.",
            p
        ));
        run.setval(inj, Value::Null, 2);
        inj.halt();
        return Value::Null;
    }
    let alts: Vec<Value> = match &parent {
        Value::List(items) if items.len() > 1 => items[1..].to_vec(),
        _ => {
            inj.err(format!(
                "The $ONE validator at {} needs at least one alternative.",
                p
            ));
            run.setval(inj, Value::Null, 2);
            inj.halt();
            return Value::Null;
        }
    };

    let data = inj.dparent.clone();
    for alt in &alts {
        let scratch = new_errs();
        let out = validate_nested(run, inj, data.clone(), alt.clone(), scratch.clone());
        if scratch.borrow().is_empty() {
            run.setval(inj, out, 2);
            inj.halt();
            return Value::Null;
        }
    }

    let names: Vec<String> = alts.iter().map(alt_name).collect();
    inj.err(if p == "<root>" {
        format!(
            "Expected one of {}, but found {}: {}.",
            names.join(", "),
            data.typify(),
            stringify(&data, None)
        )
    } else {
        format!(
            "Expected field {} to be one of {}, but found {}: {}.",
            p,
            names.join(", "),
            data.typify(),
            stringify(&data, None)
        )
    });
    run.setval(inj, Value::Null, 2);
    inj.halt();
    Value::Null
}

/// `$EXACT` — literal equality against one of the listed values.
fn cmd_exact(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        return Value::String(inj.key.clone());
    }
    let parent_path = inj.path[..inj.path.len().saturating_sub(1)].to_vec();
    let parent = run.node(&parent_path).cloned().unwrap_or(Value::Null);
    let p = pathify_parts(&parent_path, 1);

    if inj.key != "0" {
        inj.err(format!(
            "The $EXACT validator at {} must be the first element of its list.",
            p
        ));
        run.setval(inj, Value::Null, 2);
        inj.halt();
        return Value::Null;
    }
    let vals: Vec<Value> = match &parent {
        Value::List(items) if items.len() > 1 => items[1..].to_vec(),
        _ => {
            inj.err(format!(
                "The $EXACT validator at {} needs at least one value.",
                p
            ));
            run.setval(inj, Value::Null, 2);
            inj.halt();
            return Value::Null;
        }
    };

    let data = inj.dparent.clone();
    if vals.iter().any(|v| *v == data) {
        run.setval(inj, data, 2);
        inj.halt();
        return Value::Null;
    }

    let shown: Vec<String> = vals.iter().map(|v| stringify(v, None)).collect();
    let expected = if shown.len() == 1 {
        shown[0].clone()
    } else {
        format!("one of {}", shown.join(", "))
    };
    inj.err(if p == "<root>" {
        format!("Value {} should equal {}.", stringify(&data, None), expected)
    } else {
        format!(
            "Value {} at field {} should equal {}.",
            stringify(&data, None),
            p,
            expected
        )
    });
    run.setval(inj, Value::Null, 2);
    inj.halt();
    Value::Null
}

fn alt_name(alt: &Value) -> String {
    if let Value::String(s) = alt {
        if let Some(name) = s.strip_prefix("`$").and_then(|t| t.strip_suffix('`')) {
            return name.to_lowercase();
        }
    }
    stringify(alt, Some(24))
}

/// Validate a value against a sub-spec inside a running validation, reusing
/// the run's registered commands and meta flags.
pub(crate) fn validate_nested(
    run: &Injector,
    inj: &Inj,
    data: Value,
    spec: Value,
    errs: Errs,
) -> Value {
    let opts = InjectOptions {
        extra: Some(run.extras.clone()),
        meta: Some(inj.meta.borrow().clone()),
        errs: Some(errs),
        ..Default::default()
    };
    validate_with(data, spec, opts).unwrap_or(Value::Null)
}

/// The reconciliation pass, run after every visited node: checks residual
/// kind agreement, enforces closed maps, merges open-map extras, and keeps
/// the data value where the spec value was only a default.
pub(crate) fn validate_modify(run: &mut Injector, inj: &mut Inj, val: &Value) {
    // Slots addressed by command-marker keys are machinery, not data.
    if inj.key.contains("`$") {
        return;
    }
    if val.is_func() {
        return;
    }
    if let Value::String(s) = val {
        if s.starts_with('$') || s.contains("`$") {
            return;
        }
    }

    let exact = inj
        .meta_get(EXACTMETA)
        .map(|v| v == Value::Bool(true))
        .unwrap_or(false);
    let p = pathify_parts(&inj.path, 1);
    let dval = inj.dparent.get_prop(inj.key.as_str()).cloned();

    let dval = match dval {
        // Missing (or explicitly null) data keeps the spec default; exact
        // mode insists on a present, equal value.
        None | Some(Value::Null) => {
            if exact && !val.is_node() && *val != Value::Null {
                inj.err(if p == "<root>" {
                    format!("Value null should equal {}.", stringify(val, None))
                } else {
                    format!(
                        "Value null at field {} should equal {}.",
                        p,
                        stringify(val, None)
                    )
                });
            }
            return;
        }
        Some(dval) => dval,
    };

    if *val == Value::Null {
        // Spec null is a wildcard (and the residue of a failed check that
        // already reported).
        return;
    }

    if val.typify() != dval.typify() {
        inj.err(type_error(&p, val.typify(), &dval));
        return;
    }

    match (val, &dval) {
        (Value::Map(sm), Value::Map(dm)) => {
            let open = sm.contains_key(OPENMARK);
            if open {
                let mut markpath = inj.path.clone();
                markpath.push(OPENMARK.to_string());
                run.set_at(&markpath, Value::Null);
            }
            let spec_keys: Vec<&String> = sm.keys().filter(|k| !k.contains("`$")).collect();
            if !open && !spec_keys.is_empty() {
                let mut extra: Vec<String> = dm
                    .keys()
                    .filter(|k| !spec_keys.iter().any(|s| s == k))
                    .cloned()
                    .collect();
                extra.sort();
                if !extra.is_empty() {
                    inj.err(format!("Unexpected keys at {}: {}.", p, extra.join(", ")));
                }
            } else {
                for (k, v) in dval.items() {
                    if sm.get(&k).is_none() && !v.is_func() {
                        let mut kpath = inj.path.clone();
                        kpath.push(k);
                        run.set_at(&kpath, v);
                    }
                }
            }
        }
        (Value::List(_), Value::List(_)) => {}
        (scalar, dscalar) => {
            if exact && scalar != dscalar {
                inj.err(if p == "<root>" {
                    format!(
                        "Value {} should equal {}.",
                        stringify(dscalar, None),
                        stringify(scalar, None)
                    )
                } else {
                    format!(
                        "Value {} at field {} should equal {}.",
                        stringify(dscalar, None),
                        p,
                        stringify(scalar, None)
                    )
                });
            } else {
                run.setval(inj, dval.clone(), 1);
            }
        }
    }
}
