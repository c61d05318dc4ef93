use crate::inject::{Inj, Injector, TOP};
use crate::text::stringify;
use crate::value::Value;

// Sentinel standing in for an escaped `$` while fragments are expanded.
const ESCAPED: char = '\u{1}';

/// Resolve a dotted path against a store value.
pub fn getpath(store: &Value, path: &str) -> Value {
    let mut run = Injector::new(store.clone(), Value::Null);
    let mut inj = bare_state(None);
    resolve_ref(&mut run, &mut inj, path)
}

/// Resolve a dotted path with an explicit injection state, honoring its
/// `dparent`/`dpath` (relative paths), `key`, `meta` and handler.
pub fn getpath_with(store: &Value, path: &str, inj: &mut Inj) -> Value {
    let mut run = Injector::new(store.clone(), Value::Null);
    resolve_ref(&mut run, inj, path)
}

fn bare_state(dparent: Option<Value>) -> Inj {
    use std::cell::RefCell;
    use std::rc::Rc;
    Inj {
        mode: crate::inject::Mode::Val,
        full: false,
        key_i: 0,
        keys: vec![TOP.to_string()],
        key: TOP.to_string(),
        val: Value::Null,
        path: vec![TOP.to_string()],
        base: TOP.to_string(),
        dparent: dparent.unwrap_or(Value::Null),
        dpath: vec![TOP.to_string()],
        meta: Rc::new(RefCell::new(Default::default())),
        errs: crate::inject::new_errs(),
        handler: None,
    }
}

/// Core resolution; the handler (when present) post-processes the result,
/// which is where commands fire.
pub(crate) fn resolve_ref(run: &mut Injector, inj: &mut Inj, refpath: &str) -> Value {
    let parts: Vec<String> = refpath.split('.').map(|p| p.to_string()).collect();
    let val = resolve_parts(run, inj, &parts);
    match inj.handler.clone() {
        Some(handler) => (*handler)(run, inj, val, refpath),
        None => val,
    }
}

fn resolve_parts(run: &mut Injector, inj: &mut Inj, parts: &[String]) -> Value {
    let store = run.store().clone();

    if parts.is_empty() || (parts.len() == 1 && parts[0].is_empty()) {
        return store
            .get_prop(inj.base.as_str())
            .cloned()
            .unwrap_or(store);
    }

    // Meta-path: `name$=rest` or `name$~rest` in the first segment re-roots
    // the walk at the meta bag.
    if let Some((prefix, rest)) = split_meta_path(&parts[0]) {
        let root = inj.meta_get(&prefix).unwrap_or(Value::Null);
        let mut walk_parts: Vec<String> = Vec::new();
        if !rest.is_empty() {
            walk_parts.push(rest);
        }
        walk_parts.extend(parts[1..].iter().cloned());
        return walk_from(run, inj, root, &walk_parts);
    }

    // Leading empty segments: relative root, extra ones ascend.
    let empties = parts.iter().take_while(|p| p.is_empty()).count();
    if empties > 0 {
        let mut root = inj.dparent.clone();
        let ascends = empties.saturating_sub(2);
        if ascends > 0 {
            let mut dpath = inj.dpath.clone();
            for _ in 0..ascends {
                if dpath.len() > 1 {
                    dpath.pop();
                }
            }
            root = node_at_dpath(&store, &dpath);
        }
        return walk_from(run, inj, root, &parts[empties..]);
    }

    // Absolute: store first, then the data under the base key, then the
    // current data parent, all on the first segment only.
    let first = expand_part(run, inj, &parts[0]);
    let mut val = store.get_prop(first.as_str()).cloned();
    if val.is_none() {
        val = store
            .get_prop(inj.base.as_str())
            .and_then(|base| base.get_prop(first.as_str()))
            .cloned();
    }
    if val.is_none() {
        val = inj.dparent.get_prop(first.as_str()).cloned();
    }
    let Some(val) = val else {
        return Value::Null;
    };
    descend(run, inj, val, &parts[1..])
}

fn walk_from(run: &mut Injector, inj: &mut Inj, root: Value, parts: &[String]) -> Value {
    if parts.is_empty() {
        return root;
    }
    let first = expand_part(run, inj, &parts[0]);
    match root.get_prop(first.as_str()).cloned() {
        Some(val) => descend(run, inj, val, &parts[1..]),
        None => Value::Null,
    }
}

fn descend(run: &mut Injector, inj: &mut Inj, mut val: Value, parts: &[String]) -> Value {
    for part in parts {
        let part = expand_part(run, inj, part);
        match val.get_prop(part.as_str()) {
            Some(next) => val = next.clone(),
            None => return Value::Null,
        }
    }
    val
}

/// The node the data path points at, re-walked from the store.
fn node_at_dpath(store: &Value, dpath: &[String]) -> Value {
    let mut cur = store.clone();
    for (i, part) in dpath.iter().enumerate() {
        let next = cur.get_prop(part.as_str()).cloned();
        cur = match next {
            Some(v) => v,
            // The holder key is virtual when the store itself is the data.
            None if i == 0 && part == TOP => cur,
            None => return Value::Null,
        };
    }
    cur
}

fn split_meta_path(part: &str) -> Option<(String, String)> {
    for op in ["$=", "$~"] {
        if let Some(idx) = part.find(op) {
            let prefix = &part[..idx];
            if !prefix.is_empty() && !prefix.ends_with('$') {
                return Some((prefix.to_string(), part[idx + 2..].to_string()));
            }
        }
    }
    None
}

/// One path segment, with `$$` escapes, `$KEY` substitution and dynamic
/// `$GET:`/`$REF:`/`$META:` fragments applied.
fn expand_part(run: &mut Injector, inj: &mut Inj, part: &str) -> String {
    if !part.contains('$') {
        return part.to_string();
    }
    let mut out = part.replace("$$", &ESCAPED.to_string());
    if out.contains("$KEY") {
        out = out.replace("$KEY", &inj.key);
    }
    for name in ["$GET:", "$REF:", "$META:"] {
        while let Some(start) = out.find(name) {
            let tail = &out[start + name.len()..];
            let Some(len) = tail.find('$') else {
                break;
            };
            let subpath = tail[..len].to_string();
            let resolved = resolve_fragment(run, inj, name, &subpath);
            let text = stringify(&resolved, None);
            out = format!(
                "{}{}{}",
                &out[..start],
                text,
                &out[start + name.len() + len + 1..]
            );
        }
    }
    out.replace(ESCAPED, "$")
}

fn resolve_fragment(run: &mut Injector, inj: &mut Inj, name: &str, subpath: &str) -> Value {
    match name {
        // Data lookup, without re-triggering any handler.
        "$GET:" => {
            let handler = inj.handler.take();
            let parts: Vec<String> = subpath.split('.').map(|p| p.to_string()).collect();
            let val = resolve_parts(run, inj, &parts);
            inj.handler = handler;
            val
        }
        "$REF:" => {
            let spec = run
                .store()
                .get_prop("$SPEC")
                .cloned()
                .unwrap_or(Value::Null);
            plain_walk(&spec, subpath)
        }
        _ => {
            let meta = Value::Map(inj.meta.borrow().clone());
            plain_walk(&meta, subpath)
        }
    }
}

pub(crate) fn plain_walk(root: &Value, path: &str) -> Value {
    let mut cur = root.clone();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        match cur.get_prop(part) {
            Some(next) => cur = next.clone(),
            None => return Value::Null,
        }
    }
    cur
}
