use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Values that can be read out of an [`ArgBag`] with [`ArgBag::parsed`].
///
/// `from_arg` returns a human-readable reason on mismatch; the bag wraps it
/// into [`GatewayError::InvalidArgument`] with the argument name.
pub trait ArgValue: Sized {
    fn from_arg(value: &Value) -> Result<Self, String>;
}

/// Named-argument bag carried by commands and notifications.
///
/// Absent keys and explicit `null` both read as "not provided", except
/// through the `nullable_*` accessors which keep the distinction so a patch
/// can clear a property.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgBag(Map<String, Value>);

impl ArgBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bag from a JSON value. `null` yields an empty bag.
    pub fn from_value(value: Value) -> Result<Self, GatewayError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(GatewayError::invalid_argument(
                "arguments",
                format!("expected an object, got {}", type_name(&other)),
            )),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|value| !value.is_null())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn str(&self, name: &str) -> Result<Option<String>, GatewayError> {
        self.read(name, "a string", |value| value.as_str().map(str::to_owned))
    }

    pub fn require_str(&self, name: &str) -> Result<String, GatewayError> {
        self.str(name)?.ok_or_else(|| missing(name))
    }

    /// `None` when absent, `Some(None)` for explicit `null`.
    pub fn nullable_str(&self, name: &str) -> Result<Option<Option<String>>, GatewayError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::Null) => Ok(Some(None)),
            Some(_) => self.str(name).map(Some),
        }
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, GatewayError> {
        self.read(name, "an integer", Value::as_i64)
    }

    pub fn u64(&self, name: &str) -> Result<Option<u64>, GatewayError> {
        self.read(name, "a non-negative integer", Value::as_u64)
    }

    pub fn bool(&self, name: &str) -> Result<Option<bool>, GatewayError> {
        self.read(name, "a boolean", Value::as_bool)
    }

    pub fn str_list(&self, name: &str) -> Result<Option<Vec<String>>, GatewayError> {
        self.read(name, "a list of strings", |value| {
            value
                .as_array()?
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect()
        })
    }

    pub fn str_map(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, GatewayError> {
        self.read(name, "a map of strings", |value| {
            value
                .as_object()?
                .iter()
                .map(|(key, item)| item.as_str().map(|item| (key.clone(), item.to_owned())))
                .collect()
        })
    }

    pub fn bag(&self, name: &str) -> Result<Option<ArgBag>, GatewayError> {
        self.read(name, "an object", |value| {
            value.as_object().cloned().map(ArgBag)
        })
    }

    pub fn parsed<T: ArgValue>(&self, name: &str) -> Result<Option<T>, GatewayError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => T::from_arg(value)
                .map(Some)
                .map_err(|reason| GatewayError::invalid_argument(name, reason)),
        }
    }

    pub fn nullable_parsed<T: ArgValue>(
        &self,
        name: &str,
    ) -> Result<Option<Option<T>>, GatewayError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::Null) => Ok(Some(None)),
            Some(_) => self.parsed(name).map(Some),
        }
    }

    fn read<T>(
        &self,
        name: &str,
        expected: &str,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<Option<T>, GatewayError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => convert(value).map(Some).ok_or_else(|| {
                GatewayError::invalid_argument(
                    name,
                    format!("expected {expected}, got {}", type_name(value)),
                )
            }),
        }
    }
}

impl From<Map<String, Value>> for ArgBag {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<ArgBag> for Value {
    fn from(bag: ArgBag) -> Self {
        bag.into_value()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ArgBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }
}

fn missing(name: &str) -> GatewayError {
    GatewayError::invalid_argument(name, "required argument is missing")
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> ArgBag {
        ArgBag::from_value(value).expect("bag")
    }

    #[test]
    fn absent_and_null_read_as_not_provided() {
        let args = bag(json!({ "user": null }));
        assert_eq!(args.str("user").expect("user"), None);
        assert_eq!(args.str("password").expect("password"), None);
    }

    #[test]
    fn nullable_keeps_explicit_null() {
        let args = bag(json!({ "forcedTransport": null, "adapterSet": "DEMO" }));
        assert_eq!(
            args.nullable_str("forcedTransport").expect("ft"),
            Some(None)
        );
        assert_eq!(
            args.nullable_str("adapterSet").expect("as"),
            Some(Some("DEMO".into()))
        );
        assert_eq!(args.nullable_str("user").expect("user"), None);
    }

    #[test]
    fn type_mismatch_names_the_argument() {
        let args = bag(json!({ "items": ["a", 2] }));
        let err = args.str_list("items").expect_err("mixed list");
        match err {
            GatewayError::InvalidArgument { name, message } => {
                assert_eq!(name, "items");
                assert!(message.contains("list of strings"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn required_string_reports_missing() {
        let err = bag(json!({})).require_str("id").expect_err("missing id");
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn nested_bags_and_maps() {
        let args = bag(json!({
            "connectionOptions": { "httpExtraHeaders": { "X-A": "1" } }
        }));
        let options = args
            .bag("connectionOptions")
            .expect("options")
            .expect("present");
        let headers = options
            .str_map("httpExtraHeaders")
            .expect("headers")
            .expect("present");
        assert_eq!(headers.get("X-A").map(String::as_str), Some("1"));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(ArgBag::from_value(json!([1, 2])).is_err());
        assert!(ArgBag::from_value(Value::Null).expect("null").is_empty());
    }
}
