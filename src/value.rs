use std::fmt;
use std::rc::Rc;
use indexmap::IndexMap;
use xxhash_rust::xxh3::Xxh3Builder;
use crate::inject::{Inj, Injector};

/// Object storage. Insertion order is preserved on writes; every ordering
/// contract of the engine (sorted keys, command keys last) is applied at
/// access time.
pub type Map = IndexMap<String, Value, Xxh3Builder>;

/// A JSON-shaped value, extended with an opaque function variant so that
/// command tables and user handlers can live inside a store.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Value>),
    Map(Map),
    Func(Func),
}

/// Numbers keep their integer/float representation but compare across it,
/// so `1 == 1.0` like JSON equality.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.as_f64().partial_cmp(&other.as_f64())
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Number::Int(n) => write!(f, "{}", n),
            Number::Float(n) => write!(f, "{}", n),
        }
    }
}

/// Signature shared by injection handlers and registered commands.
pub type CommandFn = dyn Fn(&mut Injector, &mut Inj, &Value, &str) -> Value;

/// An opaque callable stored inside a [`Value`]. Cloning shares the closure
/// (so `clone` preserves functions by reference) and equality is identity.
#[derive(Clone)]
pub struct Func(Rc<CommandFn>);

impl Func {
    pub fn new(f: impl Fn(&mut Injector, &mut Inj, &Value, &str) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, run: &mut Injector, inj: &mut Inj, val: &Value, refpath: &str) -> Value {
        (*self.0)(run, inj, val, refpath)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Func(..)")
    }
}

impl PartialEq for Func {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A container key: a non-empty string, or an integer index.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl Key {
    /// The key represented by a value, if it is one. Booleans are not keys,
    /// nor are empty strings or fractional numbers.
    pub fn from_value(v: &Value) -> Option<Key> {
        match v {
            Value::String(s) if !s.is_empty() => Some(Key::Str(s.clone())),
            Value::Number(Number::Int(n)) => Some(Key::Int(*n)),
            Value::Number(Number::Float(n)) if n.fract() == 0.0 && n.is_finite() => {
                Some(Key::Int(*n as i64))
            }
            _ => None,
        }
    }

    /// The map-lookup form of the key.
    pub fn text(&self) -> String {
        match self {
            Key::Str(s) => s.clone(),
            Key::Int(n) => n.to_string(),
        }
    }

    /// The list-index form of the key, if it has one.
    fn index(&self) -> Option<i64> {
        match self {
            Key::Int(n) => Some(*n),
            Key::Str(s) => s.parse().ok(),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::Str(s.clone())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<usize> for Key {
    fn from(n: usize) -> Self {
        Key::Int(n as i64)
    }
}

/// True when the value can act as a container key.
pub fn iskey(v: &Value) -> bool {
    Key::from_value(v).is_some()
}

impl Value {
    /// True for lists and maps, the traversable kinds.
    pub fn is_node(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn is_func(&self) -> bool {
        matches!(self, Value::Func(_))
    }

    /// True for null, `""`, `0`, `false` and empty containers.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == 0.0,
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Func(_) => false,
        }
    }

    /// The value's kind name: one of `null`, `boolean`, `number`, `string`,
    /// `function`, `array`, `object`.
    pub fn typify(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Func(_) => "function",
            Value::List(_) => "array",
            Value::Map(_) => "object",
        }
    }

    /// Child lookup. Maps use the stringified key; lists coerce string keys
    /// to indices. Negative indices are not accepted here (see
    /// [`Value::get_elem`]).
    pub fn get_prop<K: Into<Key>>(&self, key: K) -> Option<&Value> {
        let key = key.into();
        match self {
            Value::Map(entries) => entries.get(key.text().as_str()),
            Value::List(items) => {
                let idx = key.index()?;
                if idx < 0 {
                    return None;
                }
                items.get(idx as usize)
            }
            _ => None,
        }
    }

    /// Mutable child lookup with the same key coercion as [`Value::get_prop`].
    pub(crate) fn get_prop_mut<K: Into<Key>>(&mut self, key: K) -> Option<&mut Value> {
        let key = key.into();
        match self {
            Value::Map(entries) => entries.get_mut(key.text().as_str()),
            Value::List(items) => {
                let idx = key.index()?;
                if idx < 0 {
                    return None;
                }
                items.get_mut(idx as usize)
            }
            _ => None,
        }
    }

    /// List element lookup, accepting negative indices counted from the end.
    pub fn get_elem(&self, idx: i64) -> Option<&Value> {
        let Value::List(items) = self else {
            return None;
        };
        let idx = if idx < 0 { items.len() as i64 + idx } else { idx };
        if idx < 0 {
            return None;
        }
        items.get(idx as usize)
    }

    /// Child write. A Null value deletes: map keys are removed, list
    /// elements are removed and the tail shifts down. On lists a negative
    /// key prepends and a key past the end appends.
    pub fn set_prop<K: Into<Key>>(&mut self, key: K, val: Value) {
        let key = key.into();
        match self {
            Value::Map(entries) => {
                if let Value::Null = val {
                    entries.shift_remove(key.text().as_str());
                } else {
                    entries.insert(key.text(), val);
                }
            }
            Value::List(items) => {
                let Some(idx) = key.index() else { return };
                if let Value::Null = val {
                    if 0 <= idx && (idx as usize) < items.len() {
                        items.remove(idx as usize);
                    }
                } else if idx < 0 {
                    items.insert(0, val);
                } else if (idx as usize) >= items.len() {
                    items.push(val);
                } else {
                    items[idx as usize] = val;
                }
            }
            _ => {}
        }
    }

    /// Child removal: map key delete or list element shift-out.
    pub fn del_prop<K: Into<Key>>(&mut self, key: K) {
        let key = key.into();
        match self {
            Value::Map(entries) => {
                entries.shift_remove(key.text().as_str());
            }
            Value::List(items) => {
                if let Some(idx) = key.index() {
                    if 0 <= idx && (idx as usize) < items.len() {
                        items.remove(idx as usize);
                    }
                }
            }
            _ => {}
        }
    }

    /// Sorted map keys, list indices as strings, or nothing.
    pub fn keys_of(&self) -> Vec<String> {
        match self {
            Value::Map(entries) => {
                let mut keys: Vec<String> = entries.keys().cloned().collect();
                keys.sort();
                keys
            }
            Value::List(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// `(key, value)` pairs in the deterministic order of [`Value::keys_of`].
    pub fn items(&self) -> Vec<(String, Value)> {
        self.keys_of()
            .into_iter()
            .map(|k| {
                let v = self.get_prop(k.as_str()).cloned().unwrap_or(Value::Null);
                (k, v)
            })
            .collect()
    }

    /// List/string length, map key count, number floor, bool as 0/1.
    pub fn size(&self) -> i64 {
        match self {
            Value::List(items) => items.len() as i64,
            Value::String(s) => s.chars().count() as i64,
            Value::Map(entries) => entries.len() as i64,
            Value::Number(n) => n.as_f64().floor() as i64,
            Value::Bool(b) => *b as i64,
            _ => 0,
        }
    }

    /// Slice of a list or string with JS index normalization (negative
    /// indices count from the end, out-of-order bounds give an empty
    /// result). Numbers clamp between `start` and `end`.
    pub fn slice(&self, start: i64, end: Option<i64>) -> Value {
        match self {
            Value::Number(n) => {
                let lo = start as f64;
                let hi = end.map(|e| e as f64).unwrap_or(f64::INFINITY);
                Value::Number(Number::Float(n.as_f64().clamp(lo, hi.max(lo))))
            }
            Value::List(items) => {
                let (a, b) = slice_bounds(items.len(), start, end);
                Value::List(items[a..b].to_vec())
            }
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (a, b) = slice_bounds(chars.len(), start, end);
                Value::String(chars[a..b].iter().collect())
            }
            _ => Value::List(Vec::new()),
        }
    }
}

fn slice_bounds(len: usize, start: i64, end: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
    let a = norm(start);
    let b = norm(end.unwrap_or(len));
    if a >= b {
        (0, 0)
    } else {
        (a as usize, b as usize)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Number(Number::Int(i))
                } else {
                    Value::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => {
                let mut map = Map::default();
                for (k, v) in entries {
                    map.insert(k, Value::from(v));
                }
                Value::Map(map)
            }
        }
    }
}

impl PartialEq<serde_json::Value> for Value {
    fn eq(&self, other: &serde_json::Value) -> bool {
        match (self, other) {
            (Value::Null, serde_json::Value::Null) => true,
            (Value::Bool(a), serde_json::Value::Bool(b)) => a == b,
            (Value::Number(a), serde_json::Value::Number(b)) => b.as_f64() == Some(a.as_f64()),
            (Value::String(a), serde_json::Value::String(b)) => a == b,
            (Value::List(a), serde_json::Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
            }
            (Value::Map(a), serde_json::Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map(|w| v == w).unwrap_or(false))
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::Int(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(Number::Float(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
