//! `MpnBuilder.build`: assembles an FCM-style notification format.
//!
//! Starts from `notificationFormat` when given, then sets or removes each
//! property: a present argument overwrites, an absent one deletes.

use pushgate_ipc::{ArgBag, GatewayError};
use serde_json::{json, Map, Value};

use super::Outcome;

const ANDROID: &str = "android";
const NOTIFICATION: &str = "notification";

/// (argument, key under `android`)
const ANDROID_STRINGS: &[(&str, &str)] =
    &[("collapseKey", "collapse_key"), ("priority", "priority"), ("timeToLive", "ttl")];

/// (argument, key under `android.notification`)
const NOTIFICATION_STRINGS: &[(&str, &str)] = &[
    ("title", "title"),
    ("titleLocKey", "title_loc_key"),
    ("body", "body"),
    ("bodyLocKey", "body_loc_key"),
    ("icon", "icon"),
    ("sound", "sound"),
    ("tag", "tag"),
    ("color", "color"),
    ("clickAction", "click_action"),
];

const NOTIFICATION_LISTS: &[(&str, &str)] =
    &[("titleLocArguments", "title_loc_args"), ("bodyLocArguments", "body_loc_args")];

pub(super) fn command(operation: &str, args: &ArgBag) -> Outcome {
    match operation {
        "build" => Ok(Some(Value::String(build(args)?))),
        _ => Ok(None),
    }
}

pub(super) fn build(args: &ArgBag) -> Result<String, GatewayError> {
    let mut root = match args.str("notificationFormat")? {
        Some(format) => parse_format(&format)?,
        None => Map::new(),
    };

    let mut android = take_section(&mut root, ANDROID);
    for (name, key) in ANDROID_STRINGS {
        set(&mut android, key, args.str(name)?.map(Value::from));
    }
    set(
        &mut android,
        "data",
        args.str_map("data")?.map(|data| json!(data)),
    );

    let mut notification = take_section(&mut android, NOTIFICATION);
    for (name, key) in NOTIFICATION_STRINGS {
        set(&mut notification, key, args.str(name)?.map(Value::from));
    }
    for (name, key) in NOTIFICATION_LISTS {
        set(
            &mut notification,
            key,
            args.str_list(name)?.map(Value::from),
        );
    }
    if !notification.is_empty() {
        android.insert(NOTIFICATION.to_string(), Value::Object(notification));
    }
    root.insert(ANDROID.to_string(), Value::Object(android));

    Ok(Value::Object(root).to_string())
}

fn parse_format(format: &str) -> Result<Map<String, Value>, GatewayError> {
    match serde_json::from_str::<Value>(format) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(GatewayError::invalid_argument("notificationFormat", "must be a JSON object")),
        Err(err) => Err(GatewayError::invalid_argument("notificationFormat", err.to_string())),
    }
}

/// Detaches the object under `key`; anything else found there is dropped.
fn take_section(parent: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match parent.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn set(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            map.insert(key.to_string(), value);
        }
        None => {
            map.remove(key);
        }
    }
}
