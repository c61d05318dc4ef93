//! JSON structure transformation, validation and selection.
//!
//! A spec is written *by example*: it looks like the output it produces.
//! Plain values pass through, backtick references (`` `path.to.value` ``)
//! pull data in, and `$`-named commands (`` `$EACH` ``, `` `$MERGE` ``, …)
//! reshape it. Validation reuses the same machinery with a command set of
//! type checks, so a validation spec is an example document whose leaves
//! double as defaults.
//!
//! ```
//! use remold::{transform, Value};
//! use serde_json::json;
//!
//! let data = Value::from(json!({"user": {"name": "ann"}}));
//! let spec = Value::from(json!({"profile": {"label": "`user.name`"}}));
//!
//! assert_eq!(transform(data, spec), json!({"profile": {"label": "ann"}}));
//! ```
//!
//! The three public operations share one engine: [`transform`] injects a
//! spec against a store built from the data, [`validate`] is a transform
//! with type-check commands and a reconciliation pass, and [`select`]
//! validates every child of a container against a query in exact mode.

mod error;
mod inject;
mod merge;
mod path;
mod select;
mod text;
mod transform;
mod validate;
mod value;
mod walk;

pub use error::{Error, Result};
pub use inject::{
    inject, inject_with, new_errs, Errs, Handler, Inj, InjectOptions, Injector, Meta, Mode,
    Modify, TOP,
};
pub use merge::merge;
pub use path::{getpath, getpath_with};
pub use select::select;
pub use text::{escre, escurl, joinurl, jsonify, jsonify_with, pad, pathify, stringify};
pub use transform::{transform, transform_with};
pub use validate::{validate, validate_with};
pub use value::{iskey, CommandFn, Func, Key, Map, Number, Value};
pub use walk::walk;

#[cfg(test)]
mod test {
    use serde_json::json;
    use super::*;

    #[test]
    fn test_transform_then_validate() {
        //given
        let data = Value::from(json!({"items": {"a": {"n": 1}, "b": {"n": 2}}}));
        let spec = Value::from(json!({"out": ["`$EACH`", "items", {"v": "`n`"}]}));

        //when
        let shaped = transform(data, spec);
        let checked = validate(
            shaped.clone(),
            Value::from(json!({"out": ["`$CHILD`", {"v": "`$NUMBER`"}]})),
        );

        //then
        assert_eq!(shaped, json!({"out": [{"v": 1}, {"v": 2}]}));
        assert_eq!(checked.expect("valid"), json!({"out": [{"v": 1}, {"v": 2}]}));
    }

    #[test]
    fn test_errs_collector_is_shared() {
        //given
        let errs = new_errs();
        let opts = InjectOptions {
            errs: Some(errs.clone()),
            ..Default::default()
        };

        //when
        let out = validate_with(
            Value::from(json!({"a": 1})),
            Value::from(json!({"a": "`$STRING`", "b": "`$NUMBER`"})),
            opts,
        );

        //then
        assert!(out.is_ok());
        assert_eq!(
            errs.borrow().as_slice(),
            [
                "Expected field a to be string, but found number: 1.",
                "Expected field b to be number, but found null: null.",
            ]
        );
    }
}
