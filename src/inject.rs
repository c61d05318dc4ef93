use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::path::resolve_ref;
use crate::text::compact;
use crate::value::{Map, Value};

/// Conventional root key for the user data inside a store, and for the
/// working tree inside an [`Injector`].
pub const TOP: &str = "$TOP";

/// Shared, append-only error collector.
pub type Errs = Rc<RefCell<Vec<String>>>;

pub fn new_errs() -> Errs {
    Rc::new(RefCell::new(Vec::new()))
}

/// Shared free-form meta bag.
pub type Meta = Rc<RefCell<Map>>;

/// Injection-time hook: post-processes every resolved reference, and is
/// where command invocation happens.
pub type Handler = Rc<dyn Fn(&mut Injector, &mut Inj, Value, &str) -> Value>;

/// Post-visit hook, called for every visited value after its children.
pub type Modify = Rc<dyn Fn(&mut Injector, &mut Inj, &Value)>;

/// Phase of the three-phase traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    KeyPre,
    Val,
    KeyPost,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::KeyPre => "key:pre",
            Mode::Val => "val",
            Mode::KeyPost => "key:post",
        })
    }
}

/// Mutable recursion context handed to handlers and commands.
///
/// `keys`/`key_i` drive the sibling iteration of the containing node and
/// may be truncated or advanced by commands; the driver re-reads them after
/// every phase. `dparent`/`dpath` are the parallel pointer into the data
/// being transformed, kept in lockstep with `path`.
#[derive(Clone)]
pub struct Inj {
    pub mode: Mode,
    pub full: bool,
    pub key_i: usize,
    pub keys: Vec<String>,
    pub key: String,
    pub val: Value,
    pub path: Vec<String>,
    pub base: String,
    pub dparent: Value,
    pub dpath: Vec<String>,
    pub meta: Meta,
    pub errs: Errs,
    pub handler: Option<Handler>,
}

impl Inj {
    fn child(&self, key: &str, key_i: usize) -> Inj {
        let mut path = self.path.clone();
        path.push(key.to_string());
        Inj {
            mode: Mode::KeyPre,
            full: false,
            key_i,
            keys: self.keys.clone(),
            key: key.to_string(),
            val: Value::Null,
            path,
            base: self.base.clone(),
            dparent: self.dparent.clone(),
            dpath: self.dpath.clone(),
            meta: Rc::clone(&self.meta),
            errs: Rc::clone(&self.errs),
            handler: self.handler.clone(),
        }
    }

    /// Append an error; the list is shared with every ancestor state.
    pub fn err(&self, msg: String) {
        self.errs.borrow_mut().push(msg);
    }

    /// Stop the sibling iteration of the containing node.
    pub fn halt(&mut self) {
        self.key_i = self.keys.len();
        self.keys.clear();
    }

    /// Meta lookup, by key.
    pub fn meta_get(&self, key: &str) -> Option<Value> {
        self.meta.borrow().get(key).cloned()
    }
}

/// Optional pieces of an injection run (the `InjDef` of the public
/// contract). Everything defaults.
#[derive(Default, Clone)]
pub struct InjectOptions {
    pub extra: Option<Map>,
    pub modify: Option<Modify>,
    pub handler: Option<Handler>,
    pub meta: Option<Map>,
    pub errs: Option<Errs>,
    pub base: Option<String>,
    pub dparent: Option<Value>,
    pub dpath: Option<Vec<String>>,
}

/// The engine context of one injection run: the growing working tree (the
/// spec clone under a `$TOP` holder) plus the read-only store. All tree
/// mutation is path-addressed through this type, so commands can write into
/// any ancestor without aliasing.
pub struct Injector {
    root: Value,
    store: Value,
    pub(crate) modify: Option<Modify>,
    pub(crate) extras: Map,
}

impl Injector {
    pub(crate) fn new(store: Value, val: Value) -> Self {
        let mut holder = Map::default();
        holder.insert(TOP.to_string(), val);
        Self {
            root: Value::Map(holder),
            store,
            modify: None,
            extras: Map::default(),
        }
    }

    pub fn store(&self) -> &Value {
        &self.store
    }

    /// The node at a root-relative key path.
    pub fn node(&self, path: &[String]) -> Option<&Value> {
        let mut cur = &self.root;
        for part in path {
            cur = cur.get_prop(part.as_str())?;
        }
        Some(cur)
    }

    fn node_mut(&mut self, path: &[String]) -> Option<&mut Value> {
        let mut cur = &mut self.root;
        for part in path {
            cur = cur.get_prop_mut(part.as_str())?;
        }
        Some(cur)
    }

    pub(crate) fn set_at(&mut self, path: &[String], val: Value) {
        let Some((last, parent)) = path.split_last() else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.set_prop(last.as_str(), val);
        }
    }

    /// Write relative to the state's position: `ancestors` of 1 writes the
    /// current slot, 2 replaces the containing node in *its* parent, and so
    /// on upwards. Null deletes, per `set_prop`.
    pub fn setval(&mut self, inj: &Inj, val: Value, ancestors: usize) {
        let up = ancestors.max(1) - 1;
        let keep = inj.path.len().saturating_sub(up).max(1);
        let path = inj.path[..keep].to_vec();
        self.set_at(&path, val);
    }

    pub(crate) fn take_out(self) -> Value {
        match self.root {
            Value::Map(mut holder) => holder.shift_remove(TOP).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// Resolve every backtick reference inside `val` against `store` and return
/// the injected result. The spec value is owned by the run; the caller's
/// copy is not touched.
pub fn inject(val: Value, store: Value) -> Value {
    inject_with(val, store, InjectOptions::default())
}

pub fn inject_with(val: Value, store: Value, opts: InjectOptions) -> Value {
    let mut store = store;
    if let Some(extra) = &opts.extra {
        if let Value::Map(entries) = &mut store {
            for (k, v) in extra {
                entries.insert(k.clone(), v.clone());
            }
        }
    }
    let mut run = Injector::new(store, val);
    run.modify = opts.modify.clone();
    if let Some(extra) = &opts.extra {
        run.extras = extra.clone();
    }
    let mut inj = root_state(&run, &opts);
    run_inject(&mut run, &mut inj);
    run.take_out()
}

pub(crate) fn root_state(run: &Injector, opts: &InjectOptions) -> Inj {
    Inj {
        mode: Mode::Val,
        full: false,
        key_i: 0,
        keys: vec![TOP.to_string()],
        key: TOP.to_string(),
        val: Value::Null,
        path: vec![TOP.to_string()],
        base: opts.base.clone().unwrap_or_else(|| TOP.to_string()),
        dparent: opts
            .dparent
            .clone()
            .unwrap_or_else(|| run.store().clone()),
        dpath: opts.dpath.clone().unwrap_or_else(|| vec![TOP.to_string()]),
        meta: Rc::new(RefCell::new(opts.meta.clone().unwrap_or_default())),
        errs: opts.errs.clone().unwrap_or_else(new_errs),
        handler: Some(
            opts.handler
                .clone()
                .unwrap_or_else(|| Rc::new(default_handler)),
        ),
    }
}

/// Run a nested root-level injection (used by `$EACH`, `$PACK` and the
/// list form of `$CHILD`) sharing the store, the error list, the meta bag
/// and the modify hook of the current run.
pub(crate) fn subinject(run: &mut Injector, val: Value, dparent: Value, inj: &Inj) -> Value {
    let mut sub = Injector::new(run.store.clone(), val);
    sub.modify = run.modify.clone();
    sub.extras = run.extras.clone();
    let mut sinj = Inj {
        mode: Mode::Val,
        full: false,
        key_i: 0,
        keys: vec![TOP.to_string()],
        key: TOP.to_string(),
        val: Value::Null,
        path: vec![TOP.to_string()],
        base: inj.base.clone(),
        dparent,
        dpath: vec![TOP.to_string()],
        meta: Rc::clone(&inj.meta),
        errs: Rc::clone(&inj.errs),
        handler: inj.handler.clone(),
    };
    run_inject(&mut sub, &mut sinj);
    sub.take_out()
}

/// The data value parallel to the slot a key-phase state is processing:
/// the state's data parent, descended by the containing node's own key.
pub(crate) fn slot_data(inj: &Inj) -> Value {
    if inj.path.len() < 2 {
        return inj.dparent.clone();
    }
    let slot = &inj.path[inj.path.len() - 2];
    inj.dparent
        .get_prop(slot.as_str())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Iteration order of a node's children: non-command keys sorted, then
/// command keys (those containing `$`) sorted; list indices ascending.
pub(crate) fn injection_keys(node: &Value) -> Vec<String> {
    match node {
        Value::Map(entries) => {
            let mut plain: Vec<String> = entries
                .keys()
                .filter(|k| !k.contains('$'))
                .cloned()
                .collect();
            plain.sort();
            let mut cmds: Vec<String> = entries
                .keys()
                .filter(|k| k.contains('$'))
                .cloned()
                .collect();
            cmds.sort();
            plain.extend(cmds);
            plain
        }
        Value::List(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn run_inject(run: &mut Injector, inj: &mut Inj) {
    // Keep the data pointer in lockstep: each level down the spec descends
    // the data by the key of the node being entered.
    if inj.path.len() >= 2 {
        let pk = inj.path[inj.path.len() - 2].clone();
        inj.dparent = inj
            .dparent
            .get_prop(pk.as_str())
            .cloned()
            .unwrap_or(Value::Null);
        inj.dpath.push(pk);
    }
    let val = run.node(&inj.path).cloned().unwrap_or(Value::Null);
    inj.val = val.clone();

    if val.is_node() {
        inj.keys = injection_keys(&val);
        let mut nk_i = 0usize;
        loop {
            // Commands may truncate the sibling list or replace the node
            // wholesale; re-read both every round.
            let len_before = match run.node(&inj.path) {
                Some(Value::List(items)) => Some(items.len()),
                Some(cur) if cur.is_node() => None,
                _ => break,
            };
            if nk_i >= inj.keys.len() {
                break;
            }
            let okey = inj.keys[nk_i].clone();
            let mut cinj = inj.child(&okey, nk_i);
            cinj.val = run.node(&cinj.path).cloned().unwrap_or(Value::Null);

            cinj.mode = Mode::KeyPre;
            let prekey = inject_str(run, &mut cinj, &okey);
            nk_i = cinj.key_i;
            inj.keys = cinj.keys.clone();

            if let Some(pk) = usable_key(&prekey) {
                // An injected key renames the entry before the val phase.
                if pk != okey {
                    let moved = run
                        .node(&inj.path)
                        .and_then(|p| p.get_prop(okey.as_str()))
                        .cloned();
                    if let Some(moved) = moved {
                        let mut newpath = inj.path.clone();
                        newpath.push(pk.clone());
                        run.set_at(&newpath, moved);
                        let mut oldpath = inj.path.clone();
                        oldpath.push(okey.clone());
                        run.set_at(&oldpath, Value::Null);
                    }
                }
                cinj.key = pk.clone();
                if let Some(last) = cinj.path.last_mut() {
                    *last = pk;
                }
                cinj.mode = Mode::Val;
                run_inject(run, &mut cinj);
                // The recursion descended the data pointer; the key phases
                // of this child see this frame's pointer.
                cinj.dparent = inj.dparent.clone();
                cinj.dpath = inj.dpath.clone();
                cinj.mode = Mode::KeyPost;
                cinj.full = false;
                inject_str(run, &mut cinj, &okey);
                nk_i = cinj.key_i;
                inj.keys = cinj.keys.clone();
            }
            nk_i += 1;
            // A command that emptied its own list slot shifted the next
            // sibling into the vacated index; re-derive the indices and
            // stay put. A halted iteration (cleared keys) is a wholesale
            // replacement, not a shift.
            if !inj.keys.is_empty() {
                let len_after = match run.node(&inj.path) {
                    Some(Value::List(items)) => Some(items.len()),
                    _ => None,
                };
                if let (Some(before), Some(after)) = (len_before, len_after) {
                    if after < before {
                        inj.keys = (0..after).map(|i| i.to_string()).collect();
                        nk_i = nk_i.saturating_sub(before - after);
                    }
                }
            }
        }
    } else if let Value::String(s) = &val {
        inj.mode = Mode::Val;
        let newval = inject_str(run, inj, &s.clone());
        run.setval(inj, newval, 1);
    }

    if let Some(modify) = run.modify.clone() {
        let cur = run.node(&inj.path).cloned().unwrap_or(Value::Null);
        (*modify)(run, inj, &cur);
    }
}

fn usable_key(prekey: &Value) -> Option<String> {
    match prekey {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(Value::Number(*n).size().to_string()),
        _ => None,
    }
}

/// String injection: resolve a full-string backtick expression, or
/// substitute every embedded one, then give the handler a final say over
/// the whole string.
pub(crate) fn inject_str(run: &mut Injector, inj: &mut Inj, s: &str) -> Value {
    if s.is_empty() {
        return Value::String(String::new());
    }
    if let Some(refpath) = full_backtick(s) {
        inj.full = true;
        return resolve_ref(run, inj, &refpath);
    }

    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] == '`' {
            if let Some(j) = closing_backtick(&chars, i) {
                let inner: String = chars[i + 1..j].iter().collect();
                let refpath = unescape_ref(&inner);
                inj.full = false;
                let found = resolve_ref(run, inj, &refpath);
                match found {
                    Value::Null => {}
                    Value::String(text) => out.push_str(&text),
                    Value::Func(_) => {
                        out.push('`');
                        out.push_str(&inner);
                        out.push('`');
                    }
                    other => out.push_str(&compact(&other)),
                }
                i = j + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    inj.full = true;
    let mut result = Value::String(out);
    if let Some(handler) = inj.handler.clone() {
        result = (*handler)(run, inj, result, s);
    }
    result
}

/// The reference of a string that is one backtick expression end to end:
/// either a `$NAME` command (an optional decimal suffix only orders
/// execution and is dropped) or a backtick-free path.
fn full_backtick(s: &str) -> Option<String> {
    let inner = s.strip_prefix('`')?.strip_suffix('`')?;
    if inner.is_empty() || inner.contains('`') {
        return None;
    }
    if let Some(name) = inner.strip_prefix('$') {
        let letters = name.trim_end_matches(|c: char| c.is_ascii_digit());
        if !letters.is_empty() && letters.chars().all(|c| c.is_ascii_uppercase()) {
            return Some(format!("${}", letters));
        }
    }
    Some(unescape_ref(inner))
}

fn closing_backtick(chars: &[char], open: usize) -> Option<usize> {
    let close = chars[open + 1..].iter().position(|c| *c == '`')? + open + 1;
    if close == open + 1 {
        None
    } else {
        Some(close)
    }
}

/// `$BT` and `$DS` escapes inside a reference; the three-character refs are
/// the literal commands themselves.
fn unescape_ref(inner: &str) -> String {
    if inner.len() > 3 {
        inner.replace("$BT", "`").replace("$DS", "$")
    } else {
        inner.to_string()
    }
}

/// The default injection handler: invoke command-shaped function refs,
/// otherwise write fully-injected values through to the current slot.
pub(crate) fn default_handler(
    run: &mut Injector,
    inj: &mut Inj,
    val: Value,
    refpath: &str,
) -> Value {
    if let Value::Func(f) = &val {
        if refpath.is_empty() || refpath.starts_with('$') {
            let func = f.clone();
            return func.call(run, inj, &val, refpath);
        }
    }
    if inj.mode == Mode::Val && inj.full {
        run.setval(inj, val.clone(), 1);
    }
    val
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use crate::value::Func;
    use super::*;

    fn store(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_inject_full_string() {
        //given
        let spec = Value::from(json!({"x": "`a`", "deep": {"y": "`b.c`"}}));

        //when
        let out = inject(spec, store(json!({"a": 1, "b": {"c": [true]}})));

        //then
        assert_eq!(out, json!({"x": 1, "deep": {"y": [true]}}));
    }

    #[test]
    fn test_inject_partial_string() {
        //given
        let spec = Value::from(json!({"msg": "a is `a` and b is `b`!"}));

        //when
        let out = inject(spec, store(json!({"a": 1, "b": {"c": 2}})));

        //then
        assert_eq!(out, json!({"msg": "a is 1 and b is {\"c\":2}!"}));
    }

    #[test]
    fn test_inject_missing_ref_substitutes_empty() {
        //given
        let spec = Value::from(json!({"msg": "<`nope`>"}));

        //when
        let out = inject(spec, store(json!({"a": 1})));

        //then
        assert_eq!(out, json!({"msg": "<>"}));
    }

    #[test]
    fn test_inject_key_expression() {
        //given
        let spec = Value::from(json!({"`k`": "v"}));

        //when
        let out = inject(spec, store(json!({"k": "mapped"})));

        //then
        assert_eq!(out, json!({"mapped": "v"}));
    }

    #[test]
    fn test_inject_command_invocation() {
        //given
        let mut extra = Map::default();
        extra.insert(
            "$MARK".to_string(),
            Value::Func(Func::new(|_, inj, _, _| {
                Value::String(format!("mark:{}", inj.key))
            })),
        );
        let spec = Value::from(json!({"a": "`$MARK`"}));

        //when
        let out = inject_with(
            spec,
            store(json!({})),
            InjectOptions {
                extra: Some(extra),
                ..Default::default()
            },
        );

        //then
        assert_eq!(out, json!({"a": "mark:a"}));
    }

    #[test]
    fn test_injection_keys_order() {
        //given
        let node = Value::from(json!({"b": 1, "`$CMD`": 2, "a": 3, "$X": 4}));

        //then
        assert_eq!(injection_keys(&node), vec!["a", "b", "$X", "`$CMD`"]);
    }

    #[test]
    fn test_literal_escapes() {
        //given
        let spec = Value::from(json!({"bt": "`$BT`", "ds": "`$DS`"}));

        //when
        let out = crate::transform::transform(Value::from(json!({})), spec);

        //then
        assert_eq!(out, json!({"bt": "`", "ds": "$"}));
    }

    #[test]
    fn test_unpaired_backticks_kept() {
        //given
        let spec = Value::from(json!({"a": "x``y"}));

        //when
        let out = inject(spec, store(json!({})));

        //then
        assert_eq!(out, json!({"a": "x``y"}));
    }
}
