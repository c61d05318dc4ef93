use crate::value::Value;

/// Deep merge, later entries winning. Maps merge per key and lists per
/// index; any kind mismatch (including scalars and Null) overrides the
/// earlier value wholesale.
pub fn merge(vals: Vec<Value>) -> Value {
    let mut iter = vals.into_iter();
    let Some(first) = iter.next() else {
        return Value::Null;
    };
    iter.fold(first, merge_pair)
}

fn merge_pair(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Map(mut base), Value::Map(over)) => {
            for (k, ov) in over {
                let merged = match base.get(&k) {
                    Some(bv) => merge_pair(bv.clone(), ov),
                    None => ov,
                };
                base.insert(k, merged);
            }
            Value::Map(base)
        }
        (Value::List(mut base), Value::List(over)) => {
            for (i, ov) in over.into_iter().enumerate() {
                if i < base.len() {
                    let bv = std::mem::take(&mut base[i]);
                    base[i] = merge_pair(bv, ov);
                } else {
                    base.push(ov);
                }
            }
            Value::List(base)
        }
        (_, over) => over,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use super::*;

    fn vals(items: serde_json::Value) -> Vec<Value> {
        let Value::List(items) = Value::from(items) else {
            panic!("list fixture");
        };
        items
    }

    #[test]
    fn test_merge_basic() {
        //given
        let input = vals(json!([{"a": 1, "b": 2}, {"b": 3, "d": 4}]));

        //when
        let out = merge(input);

        //then
        assert_eq!(out, json!({"a": 1, "b": 3, "d": 4}));
    }

    #[test]
    fn test_merge_nested() {
        //given
        let input = vals(json!([
            {"a": [1, 2], "b": {"c": 3, "d": 4}},
            {"a": [11], "b": {"c": 33}}
        ]));

        //when
        let out = merge(input);

        //then
        assert_eq!(out, json!({"a": [11, 2], "b": {"c": 33, "d": 4}}));
    }

    #[test]
    fn test_merge_kind_override() {
        //given
        let input = vals(json!([{"a": {"x": 1}}, {"a": [2]}, {"a": "s"}]));

        //when
        let out = merge(input);

        //then
        assert_eq!(out, json!({"a": "s"}));
    }

    #[test]
    fn test_merge_degenerate() {
        assert_eq!(merge(Vec::new()), Value::Null);
        assert_eq!(merge(vals(json!([{"a": 1}]))), json!({"a": 1}));
        assert_eq!(merge(vals(json!([{"a": 1}, {}]))), json!({"a": 1}));
    }
}
