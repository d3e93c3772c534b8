use serde_json::json;
use signalkit::{FlagDiff, FlagMap, FlagValue};

#[test]
fn test_bool_value() {
    let value = FlagValue::Bool(true);

    assert_eq!(value.as_bool(), Some(true));
    assert!(value.as_string().is_none());
    assert!(value.as_number().is_none());
    assert!(value.is_enabled());
}

#[test]
fn test_string_value_is_enabled_variant() {
    let value = FlagValue::String("control".to_string());

    assert_eq!(value.as_string(), Some("control"));
    assert!(value.as_bool().is_none());
    assert!(value.is_enabled());
}

#[test]
fn test_present_null_value_is_enabled() {
    let value = FlagValue::Null;

    assert!(value.is_null());
    assert!(value.is_enabled());
    assert!(value.as_bool().is_none());
}

#[test]
fn test_json_value() {
    let document = json!({"key": "value"});
    let value = FlagValue::Json(document.clone());

    assert_eq!(value.as_json(), Some(&document));
    assert!(value.is_enabled());
}

#[test]
fn test_from_serde_json() {
    assert_eq!(FlagValue::from(json!(true)), FlagValue::Bool(true));
    assert_eq!(FlagValue::from(json!("test")), FlagValue::String("test".into()));
    assert_eq!(FlagValue::from(json!(123)), FlagValue::Number(123.0));
    assert_eq!(FlagValue::from(serde_json::Value::Null), FlagValue::Null);
    assert_eq!(FlagValue::from(json!([1, 2])), FlagValue::Json(json!([1, 2])));
}

#[test]
fn test_from_primitives() {
    let value: FlagValue = true.into();
    assert_eq!(value.as_bool(), Some(true));

    let value: FlagValue = "hello".into();
    assert_eq!(value.as_string(), Some("hello"));

    let value: FlagValue = 2.5_f64.into();
    assert_eq!(value.as_number(), Some(2.5));
}

#[test]
fn test_serialization_keeps_server_shape() {
    assert_eq!(serde_json::to_string(&FlagValue::Bool(true)).unwrap(), "true");
    assert_eq!(
        serde_json::to_string(&FlagValue::String("hello".into())).unwrap(),
        "\"hello\""
    );
    assert_eq!(serde_json::to_string(&FlagValue::Null).unwrap(), "null");
}

#[test]
fn test_flag_map_cache_round_trip() {
    let mut flags = FlagMap::new();
    flags.insert("a".into(), FlagValue::Bool(false));
    flags.insert("b".into(), FlagValue::String("test".into()));
    flags.insert("c".into(), FlagValue::Json(json!({"nested": [1]})));

    let bytes = serde_json::to_vec(&flags).unwrap();
    let restored: FlagMap = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(restored, flags);
}

#[test]
fn test_diff_treats_type_change_as_change() {
    let mut old = FlagMap::new();
    old.insert("a".into(), FlagValue::Bool(true));
    let mut new = FlagMap::new();
    new.insert("a".into(), FlagValue::String("true".into()));

    let diff = FlagDiff::between(&old, &new);
    assert!(diff.changed.contains("a"));
    assert!(diff.added.is_empty());
    assert!(diff.removed.is_empty());
}

#[test]
fn test_diff_from_empty() {
    let mut new = FlagMap::new();
    new.insert("a".into(), FlagValue::Bool(false));

    let diff = FlagDiff::between(&FlagMap::new(), &new);
    assert!(diff.added.contains("a"));
    assert_eq!(diff.changed_keys().len(), 1);
    assert!(FlagDiff::between(&FlagMap::new(), &FlagMap::new()).is_empty());
}
