use std::fs::File;
use serde::Deserialize;
use serde_json::Value as Json;
use remold::{new_errs, select, transform, validate_with, InjectOptions, Value};

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
enum TestData {
    Transform {
        data: Json,
        spec: Json,
        expected: Json,
    },
    Validate {
        data: Json,
        spec: Json,
        #[serde(default)]
        expected: Option<Json>,
        #[serde(default)]
        errors: Vec<String>,
    },
    Select {
        children: Json,
        query: Json,
        expected: Json,
    },
}

#[test]
fn test_all() {
    let tests = [
        "copy_and_paths",
        "each_map",
        "each_list",
        "pack_rows",
        "merge_spread",
        "ref_recursion",
        "validate_types",
        "validate_errors",
        "validate_child_open",
        "validate_one_exact",
        "select_query",
        "select_compare",
    ];
    for name in tests {
        do_test(name);
    }
}

fn do_test(name: &str) {
    //given
    let file = File::open(format!(
        "{}/tests/data/{}.json",
        env!("CARGO_MANIFEST_DIR"),
        name
    ))
    .unwrap_or_else(|_| panic!("existing file for test `{}`", name));
    let test: TestData = serde_json::from_reader(file)
        .unwrap_or_else(|err| panic!("unable to parse file for test `{}`: {:?}", name, err));

    match test {
        TestData::Transform {
            data,
            spec,
            expected,
        } => {
            //when
            let result = transform(Value::from(data), Value::from(spec));

            //then
            assert_eq!(result, expected, "failed assertion for test `{}`", name);
        }
        TestData::Validate {
            data,
            spec,
            expected,
            errors,
        } => {
            //when
            let errs = new_errs();
            let opts = InjectOptions {
                errs: Some(errs.clone()),
                ..Default::default()
            };
            let result = validate_with(Value::from(data), Value::from(spec), opts)
                .unwrap_or_else(|err| panic!("collector supplied for `{}`: {}", name, err));

            //then
            assert_eq!(
                errs.borrow().as_slice(),
                errors.as_slice(),
                "failed error assertion for test `{}`",
                name
            );
            if let Some(expected) = expected {
                assert_eq!(result, expected, "failed assertion for test `{}`", name);
            }
        }
        TestData::Select {
            children,
            query,
            expected,
        } => {
            //when
            let result = select(&Value::from(children), &Value::from(query));

            //then
            assert_eq!(
                Value::List(result),
                expected,
                "failed assertion for test `{}`",
                name
            );
        }
    }
}
