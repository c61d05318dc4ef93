use crate::value::{Map, Value};

/// Depth-first post-order traversal. `apply` sees every child before its
/// parent and its return value replaces the visited node; the root call
/// receives no key and no parent.
pub fn walk<F>(val: Value, apply: &mut F) -> Value
where
    F: FnMut(Option<&str>, Value, Option<&Value>, &[String]) -> Value,
{
    walk_at(None, val, None, &[], apply)
}

fn walk_at<F>(
    key: Option<&str>,
    val: Value,
    parent: Option<&Value>,
    path: &[String],
    apply: &mut F,
) -> Value
where
    F: FnMut(Option<&str>, Value, Option<&Value>, &[String]) -> Value,
{
    let val = match val {
        Value::Map(entries) => {
            let source = Value::Map(entries);
            let mut rebuilt = Map::default();
            for (k, child) in source.items() {
                let mut cpath = path.to_vec();
                cpath.push(k.clone());
                let walked = walk_at(Some(&k), child, Some(&source), &cpath, apply);
                rebuilt.insert(k, walked);
            }
            Value::Map(rebuilt)
        }
        Value::List(items) => {
            let source = Value::List(items.clone());
            let rebuilt = items
                .into_iter()
                .enumerate()
                .map(|(i, child)| {
                    let k = i.to_string();
                    let mut cpath = path.to_vec();
                    cpath.push(k.clone());
                    walk_at(Some(&k), child, Some(&source), &cpath, apply)
                })
                .collect();
            Value::List(rebuilt)
        }
        leaf => leaf,
    };
    apply(key, val, parent, path)
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use super::*;

    #[test]
    fn test_identity_walk() {
        //given
        let val = Value::from(json!({"a": [1, null, {"b": "x"}], "c": true}));

        //when
        let out = walk(val.clone(), &mut |_, v, _, _| v);

        //then
        assert_eq!(out, val);
    }

    #[test]
    fn test_walk_tags_strings_with_path() {
        //given
        let val = Value::from(json!({"a": {"b": "x"}, "c": "y"}));

        //when
        let out = walk(val, &mut |_, v, _, path| match v {
            Value::String(s) => Value::String(format!("{}~{}", s, path.join("."))),
            other => other,
        });

        //then
        assert_eq!(out, json!({"a": {"b": "x~a.b"}, "c": "y~c"}));
    }

    #[test]
    fn test_walk_is_post_order() {
        //given
        let val = Value::from(json!({"a": {"b": 1}}));
        let mut seen = Vec::new();

        //when
        walk(val, &mut |key, v, _, _| {
            seen.push(key.unwrap_or("<top>").to_string());
            v
        });

        //then
        assert_eq!(seen, vec!["b", "a", "<top>"]);
    }
}
