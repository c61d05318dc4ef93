use chrono::{SecondsFormat, Utc};

use crate::inject::{
    inject_with, slot_data, subinject, Inj, InjectOptions, Injector, Mode, TOP,
};
use crate::merge::merge;
use crate::path::{plain_walk, resolve_ref};
use crate::value::{Func, Map, Value};

pub(crate) const KEYMARK: &str = "`$KEY`";
pub(crate) const METAMARK: &str = "`$META`";

/// Build a new structure from `data` by resolving every backtick reference
/// and command in `spec`. The spec doubles as the shape of the output.
pub fn transform(data: Value, spec: Value) -> Value {
    transform_with(data, spec, InjectOptions::default())
}

/// [`transform`] with extras: `$`-keyed entries of `opts.extra` register as
/// commands, the remainder is merged underneath the data.
pub fn transform_with(data: Value, spec: Value, opts: InjectOptions) -> Value {
    let mut cmd_extra = Map::default();
    let mut data_extra = Map::default();
    if let Some(extra) = &opts.extra {
        for (k, v) in extra {
            if k.contains('$') {
                cmd_extra.insert(k.clone(), v.clone());
            } else {
                data_extra.insert(k.clone(), v.clone());
            }
        }
    }

    let merged = merge(vec![Value::Map(data_extra), data]);

    let mut store = Map::default();
    store.insert(TOP.to_string(), merged);
    store.insert("$SPEC".to_string(), spec.clone());
    for (name, func) in command_table() {
        store.insert(name.to_string(), Value::Func(func));
    }

    let run_opts = InjectOptions {
        extra: Some(cmd_extra),
        ..opts
    };
    inject_with(spec, Value::Map(store), run_opts)
}

fn command_table() -> Vec<(&'static str, Func)> {
    vec![
        ("$DELETE", Func::new(cmd_delete)),
        ("$COPY", Func::new(cmd_copy)),
        ("$KEY", Func::new(cmd_key)),
        ("$META", Func::new(cmd_meta)),
        ("$MERGE", Func::new(cmd_merge)),
        ("$EACH", Func::new(cmd_each)),
        ("$PACK", Func::new(cmd_pack)),
        ("$REF", Func::new(cmd_ref)),
        ("$BT", Func::new(|_, _, _, _| Value::from("`"))),
        ("$DS", Func::new(|_, _, _, _| Value::from("$"))),
        (
            "$WHEN",
            Func::new(|_, _, _, _| {
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
            }),
        ),
    ]
}

/// `$DELETE` — empty the current slot, in any phase. The val-phase
/// write-through performs the removal; key phases do it here.
fn cmd_delete(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        run.setval(inj, Value::Null, 1);
    }
    Value::Null
}

/// `$COPY` — key phases keep the key, the val phase copies the parallel
/// data value into the slot.
fn cmd_copy(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        return Value::String(inj.key.clone());
    }
    let out = inj
        .dparent
        .get_prop(inj.key.as_str())
        .cloned()
        .unwrap_or(Value::Null);
    run.setval(inj, out.clone(), 1);
    out
}

/// `$KEY` — resolve the key that identifies the current data item. An
/// explicit non-empty `` `$KEY` `` entry names the item property holding it
/// (and is consumed); otherwise the data parent's entry for the current
/// key, the `` `$META` `` stamp, and finally the second-to-last path
/// segment are consulted. An empty `` `$KEY` `` entry stays in place and is
/// filled with the resolved key during key:post.
fn cmd_key(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode == Mode::KeyPre {
        return Value::String(inj.key.clone());
    }
    let parent_path = &inj.path[..inj.path.len().saturating_sub(1)];
    let parent = run.node(parent_path).cloned().unwrap_or(Value::Null);

    if let Some(Value::String(name)) = parent.get_prop(KEYMARK) {
        if !name.is_empty() {
            let name = name.clone();
            let mut markpath = parent_path.to_vec();
            markpath.push(KEYMARK.to_string());
            run.set_at(&markpath, Value::Null);
            let item = match inj.mode {
                Mode::Val => inj.dparent.clone(),
                _ => slot_data(inj),
            };
            return item.get_prop(name.as_str()).cloned().unwrap_or(Value::Null);
        }
    }

    let found = inj
        .dparent
        .get_prop(inj.key.as_str())
        .cloned()
        .or_else(|| {
            parent
                .get_prop(METAMARK)
                .and_then(|meta| meta.get_prop("KEY"))
                .cloned()
        })
        .unwrap_or_else(|| {
            if inj.path.len() >= 2 {
                Value::String(inj.path[inj.path.len() - 2].clone())
            } else {
                Value::Null
            }
        });

    if inj.mode == Mode::KeyPost {
        // Fill the marker entry in place, unless an earlier phase already
        // consumed it.
        if parent.get_prop(KEYMARK).is_some() {
            let mut markpath = parent_path.to_vec();
            markpath.push(KEYMARK.to_string());
            run.set_at(&markpath, found);
        }
        Value::String(inj.key.clone())
    } else {
        found
    }
}

/// `$META` — positional metadata carrier; the entry itself never survives
/// into the output. Removal follows the `$DELETE` split between phases.
fn cmd_meta(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        run.setval(inj, Value::Null, 1);
    }
    Value::Null
}

/// `$MERGE` — map form merges the resolved arguments into the containing
/// map during key:post (own literals win); list form at index 0 drops the
/// command element so the remaining items become the list.
fn cmd_merge(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    match inj.mode {
        Mode::KeyPre => Value::String(inj.key.clone()),
        Mode::Val => Value::Null,
        Mode::KeyPost => {
            let parent_path = inj.path[..inj.path.len().saturating_sub(1)].to_vec();
            let parent = run.node(&parent_path).cloned().unwrap_or(Value::Null);
            let raw = parent
                .get_prop(inj.key.as_str())
                .cloned()
                .unwrap_or(Value::Null);
            let args = match raw {
                Value::String(s) if s.is_empty() => vec![run
                    .store()
                    .get_prop(TOP)
                    .cloned()
                    .unwrap_or(Value::Null)],
                Value::List(items) => items,
                other => vec![other],
            };
            let mut bare = parent.clone();
            bare.del_prop(inj.key.as_str());
            let mut list = vec![bare.clone()];
            list.extend(args);
            list.push(bare);
            run.set_at(&parent_path, merge(list));
            Value::String(inj.key.clone())
        }
    }
}

/// The resolved source of an `$EACH`/`$PACK` list: `[cmd, srcpath, child]`.
fn command_source(run: &mut Injector, inj: &mut Inj) -> (Value, Value) {
    let parent_path = &inj.path[..inj.path.len().saturating_sub(1)];
    let parent = run.node(parent_path).cloned().unwrap_or(Value::Null);
    let srcpath = match parent.get_prop(1i64) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let template = parent.get_prop(2i64).cloned().unwrap_or(Value::Null);
    let handler = inj.handler.take();
    let src = resolve_ref(run, inj, &srcpath);
    inj.handler = handler;
    (src, template)
}

/// `$EACH` — one cloned child template per source element, injected with
/// the matching element as its data parent; the result list replaces the
/// grandparent slot.
fn cmd_each(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        return Value::Null;
    }
    let (src, template) = command_source(run, inj);

    let mut clones = Vec::new();
    let mut sources = Vec::new();
    match &src {
        Value::Map(_) => {
            for (k, item) in src.items() {
                let mut tclone = template.clone();
                if tclone.is_map() {
                    let mut stamp = Map::default();
                    stamp.insert("KEY".to_string(), Value::String(k));
                    tclone.set_prop(METAMARK, Value::Map(stamp));
                }
                clones.push(tclone);
                sources.push(item);
            }
        }
        Value::List(items) => {
            for item in items {
                clones.push(template.clone());
                sources.push(item.clone());
            }
        }
        _ => {}
    }

    let mut holder = Map::default();
    holder.insert(TOP.to_string(), Value::List(sources));
    let out = subinject(run, Value::List(clones), Value::Map(holder), inj);
    run.setval(inj, out.clone(), 2);
    inj.halt();
    out.get_prop(0i64).cloned().unwrap_or(Value::Null)
}

/// `$PACK` — like `$EACH` but keyed: the packed map is keyed by each source
/// element's key property (the template's `` `$KEY` `` entry, falling back
/// to the source key for map sources).
fn cmd_pack(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        return Value::Null;
    }
    let (src, template) = command_source(run, inj);
    let keyspec = match template.get_prop(KEYMARK) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    let mut tval = Map::default();
    let mut tcur = Map::default();
    for (k, item) in src.items() {
        let named = keyspec
            .as_ref()
            .and_then(|name| item.get_prop(name.as_str()))
            .map(|v| crate::text::stringify(v, None))
            .filter(|s| !s.is_empty());
        let kname = match named {
            Some(name) => name,
            // Map sources fall back to their own key; list elements with no
            // resolvable key have nowhere to go.
            None if keyspec.is_none() || src.is_map() => k.clone(),
            None => continue,
        };
        tval.insert(kname.clone(), template.clone());
        tcur.insert(kname, item);
    }

    let mut holder = Map::default();
    holder.insert(TOP.to_string(), Value::Map(tcur));
    let out = subinject(run, Value::Map(tval), Value::Map(holder), inj);
    let first = out.get_prop("0").cloned().unwrap_or(Value::Null);
    run.setval(inj, out, 2);
    inj.halt();
    first
}

/// `$REF` — expand a `$SPEC`-relative sub-spec into the grandparent slot.
/// A sub-spec that itself contains `$REF` only expands while the parallel
/// data slot is non-null, which bounds the recursion.
fn cmd_ref(run: &mut Injector, inj: &mut Inj, _val: &Value, _ref: &str) -> Value {
    if inj.mode != Mode::Val {
        return Value::Null;
    }
    let parent_path = &inj.path[..inj.path.len().saturating_sub(1)];
    let parent = run.node(parent_path).cloned().unwrap_or(Value::Null);
    let refpath = match parent.get_prop(1i64) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let spec = run
        .store()
        .get_prop("$SPEC")
        .cloned()
        .unwrap_or(Value::Null);
    let sub = plain_walk(&spec, &refpath);

    let data_here = inj.dparent.clone();
    if contains_ref(&sub) && data_here == Value::Null {
        run.setval(inj, Value::Null, 2);
        inj.halt();
        return Value::Null;
    }

    let mut holder = Map::default();
    holder.insert(TOP.to_string(), data_here);
    let out = subinject(run, sub, Value::Map(holder), inj);
    let first = out.get_prop("0").cloned().unwrap_or(Value::Null);
    run.setval(inj, out, 2);
    inj.halt();
    first
}

fn contains_ref(val: &Value) -> bool {
    match val {
        Value::String(s) => s.contains("`$REF`"),
        Value::List(items) => items.iter().any(contains_ref),
        Value::Map(entries) => entries.values().any(contains_ref),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use super::*;

    fn v(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_transform_identity() {
        //given
        let data = v(json!({"a": 1, "b": {"c": [true, "x"]}}));

        //when
        let out = transform(data.clone(), data.clone());

        //then
        assert_eq!(out, data);
    }

    #[test]
    fn test_transform_copy_and_extra() {
        //given
        let mut extra = Map::default();
        extra.insert("b".to_string(), v(json!(2)));
        extra.insert(
            "$UPPER".to_string(),
            Value::Func(Func::new(|_, inj, _, _| {
                Value::String(inj.path.last().cloned().unwrap_or_default().to_uppercase())
            })),
        );

        //when
        let out = transform_with(
            v(json!({"a": 1})),
            v(json!({"x": "`a`", "b": "`$COPY`", "c": "`$UPPER`"})),
            InjectOptions {
                extra: Some(extra),
                ..Default::default()
            },
        );

        //then
        assert_eq!(out, json!({"x": 1, "b": 2, "c": "C"}));
    }

    #[test]
    fn test_transform_delete() {
        //given
        let data = v(json!({"a": 1, "b": 2}));
        let spec = v(json!({"a": "`a`", "b": "`$DELETE`"}));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn test_transform_delete_in_list() {
        //given
        let data = v(json!({"a": 42}));
        let spec = v(json!(["`$DELETE`", "`a`"]));

        //when
        let out = transform(data, spec);

        //then
        // the sibling shifted into the vacated slot is still injected
        assert_eq!(out, json!([42]));
    }

    #[test]
    fn test_transform_meta_in_list() {
        //given
        let spec = v(json!(["`$META`", 7]));

        //when
        let out = transform(v(json!({})), spec);

        //then
        assert_eq!(out, json!([7]));
    }

    #[test]
    fn test_transform_key_value_position() {
        //given
        let data = v(json!({"items": {"one": {"n": 1}}}));
        let spec = v(json!({"out": ["`$EACH`", "items", {"id": "`$KEY`", "v": "`n`"}]}));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(out, json!({"out": [{"id": "one", "v": 1}]}));
    }

    #[test]
    fn test_transform_each_map_source() {
        //given
        let data = v(json!({"items": {"a": {"n": 1}, "b": {"n": 2}}}));
        let spec = v(json!({"out": ["`$EACH`", "items", {"`$KEY`": "", "v": "`n`"}]}));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(
            out,
            json!({"out": [{"`$KEY`": "a", "v": 1}, {"`$KEY`": "b", "v": 2}]})
        );
    }

    #[test]
    fn test_transform_each_list_source() {
        //given
        let data = v(json!({"items": [{"n": 10}, {"n": 20}]}));
        let spec = v(json!({"out": ["`$EACH`", "items", {"v": "`n`"}]}));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(out, json!({"out": [{"v": 10}, {"v": 20}]}));
    }

    #[test]
    fn test_transform_each_empty_source() {
        //given
        let spec = v(json!({"out": ["`$EACH`", "missing", {"v": "`n`"}]}));

        //when
        let out = transform(v(json!({})), spec);

        //then
        assert_eq!(out, json!({"out": []}));
    }

    #[test]
    fn test_transform_pack() {
        //given
        let data = v(json!({"rows": [
            {"name": "alpha", "size": 1},
            {"name": "beta", "size": 2}
        ]}));
        let spec = v(json!({"by_name": [
            "`$PACK`", "rows", {"`$KEY`": "name", "size": "`size`"}
        ]}));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(
            out,
            json!({"by_name": {"alpha": {"size": 1}, "beta": {"size": 2}}})
        );
    }

    #[test]
    fn test_transform_merge_map() {
        //given
        let data = v(json!({"x": {"p": 1, "q": 2}}));
        let spec = v(json!({"out": {"q": 99, "`$MERGE`": "`x`"}}));

        //when
        let out = transform(data, spec);

        //then
        // own literals win over merged values
        assert_eq!(out, json!({"out": {"q": 99, "p": 1}}));
    }

    #[test]
    fn test_transform_merge_root() {
        //given
        let data = v(json!({"a": 1, "b": 2}));
        let spec = v(json!({"`$MERGE`": "", "c": 3}));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(out, json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_transform_merge_list_form() {
        //given
        let spec = v(json!(["`$MERGE`", {"a": 1}, {"b": 2}]));

        //when
        let out = transform(v(json!({})), spec);

        //then
        assert_eq!(out, json!([{"a": 1}, {"b": 2}]));
    }

    #[test]
    fn test_transform_merge_list_form_resolves_shifted_refs() {
        //given
        let data = v(json!({"x": 5}));
        let spec = v(json!(["`$MERGE`", "`x`", {"b": 2}]));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(out, json!([5, {"b": 2}]));
    }

    #[test]
    fn test_transform_ref_bounded_by_data() {
        //given
        let data = v(json!({"person": {
            "name": "ann",
            "friend": {"name": "bob", "friend": {"name": "cho"}}
        }}));
        let spec = v(json!({"person": {
            "name": "`name`",
            "friend": ["`$REF`", "person"]
        }}));

        //when
        let out = transform(data, spec);

        //then
        assert_eq!(
            out,
            json!({"person": {
                "name": "ann",
                "friend": {"name": "bob", "friend": {"name": "cho"}}
            }})
        );
    }
}
