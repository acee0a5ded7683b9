use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::args::{type_name, ArgBag, ArgValue};

// ── Handles ───────────────────────────────────────────────────────────────────

/// Opaque string identifier naming a registry entry across the boundary.
pub type Handle = String;

/// The four independent handle namespaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Client,
    Subscription,
    MpnSubscription,
    MpnDevice,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Subscription => "subscription",
            Self::MpnSubscription => "mpn subscription",
            Self::MpnDevice => "mpn device",
        })
    }
}

/// Token returned by `add_listener`, used to detach the same listener later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

// ── Command protocol ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    /// `Component.Operation`
    pub command: String,
    #[serde(default)]
    pub arguments: ArgBag,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, arguments: ArgBag) -> Self {
        Self {
            command: command.into(),
            arguments,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CommandResponse {
    Success {
        #[serde(default)]
        payload: Value,
    },
    NotImplemented,
    Error {
        code: String,
        message: String,
        #[serde(rename = "nativeDetail", default)]
        native_detail: Option<Value>,
    },
}

impl CommandResponse {
    pub fn success(payload: impl Into<Value>) -> Self {
        Self::Success {
            payload: payload.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload } => Some(payload),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Error { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// One-way message to the frontend. No acknowledgement is expected.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// `ListenerKind.EventName`
    pub event: String,
    pub arguments: ArgBag,
}

impl Notification {
    pub fn new(event: impl Into<String>, arguments: ArgBag) -> Self {
        Self {
            event: event.into(),
            arguments,
        }
    }

    /// Reads the owning handle stamped under `key`.
    pub fn handle(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

// ── Enumerations ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionMode {
    Merge,
    Distinct,
    Command,
    Raw,
}

impl SubscriptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "MERGE",
            Self::Distinct => "DISTINCT",
            Self::Command => "COMMAND",
            Self::Raw => "RAW",
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ArgValue for SubscriptionMode {
    fn from_arg(value: &Value) -> Result<Self, String> {
        match value.as_str() {
            Some("MERGE") => Ok(Self::Merge),
            Some("DISTINCT") => Ok(Self::Distinct),
            Some("COMMAND") => Ok(Self::Command),
            Some("RAW") => Ok(Self::Raw),
            Some(other) => Err(format!("unknown subscription mode {other:?}")),
            None => Err(format!("expected a subscription mode, got {}", type_name(value))),
        }
    }
}

/// Filter for MPN subscription queries. Absent means `All`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MpnFilter {
    #[default]
    All,
    Subscribed,
    Triggered,
}

impl ArgValue for MpnFilter {
    fn from_arg(value: &Value) -> Result<Self, String> {
        match value.as_str() {
            Some("ALL") => Ok(Self::All),
            Some("SUBSCRIBED") => Ok(Self::Subscribed),
            Some("TRIGGERED") => Ok(Self::Triggered),
            Some(other) => Err(format!("unknown mpn filter {other:?}")),
            None => Err(format!("expected an mpn filter, got {}", type_name(value))),
        }
    }
}

// ── Tunables ──────────────────────────────────────────────────────────────────
//
// Each tunable accepts either a number or a sentinel string, and travels back
// to the frontend in its string form.

macro_rules! string_tunable {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = Value::deserialize(deserializer)?;
                <$ty as ArgValue>::from_arg(&value).map_err(serde::de::Error::custom)
            }
        }
    };
}

fn number_arg(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn count_arg(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn is_sentinel(value: &Value, sentinel: &str) -> bool {
    value
        .as_str()
        .is_some_and(|text| text.eq_ignore_ascii_case(sentinel))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferSize {
    Unlimited,
    Limited(u32),
}

impl fmt::Display for BufferSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Limited(size) => write!(f, "{size}"),
        }
    }
}

impl ArgValue for BufferSize {
    fn from_arg(value: &Value) -> Result<Self, String> {
        if is_sentinel(value, "unlimited") {
            return Ok(Self::Unlimited);
        }
        match count_arg(value) {
            Some(size) if size > 0 => Ok(Self::Limited(size)),
            _ => Err(format!("expected \"unlimited\" or a positive integer, got {value}")),
        }
    }
}

string_tunable!(BufferSize);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MaxFrequency {
    Unlimited,
    Unfiltered,
    Limited(f64),
}

impl fmt::Display for MaxFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Unfiltered => f.write_str("unfiltered"),
            Self::Limited(rate) => write!(f, "{rate}"),
        }
    }
}

impl ArgValue for MaxFrequency {
    fn from_arg(value: &Value) -> Result<Self, String> {
        if is_sentinel(value, "unlimited") {
            return Ok(Self::Unlimited);
        }
        if is_sentinel(value, "unfiltered") {
            return Ok(Self::Unfiltered);
        }
        match number_arg(value) {
            Some(rate) if rate > 0.0 => Ok(Self::Limited(rate)),
            _ => Err(format!(
                "expected \"unlimited\", \"unfiltered\" or a positive number, got {value}"
            )),
        }
    }
}

string_tunable!(MaxFrequency);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Snapshot {
    Yes,
    No,
    Length(u32),
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("yes"),
            Self::No => f.write_str("no"),
            Self::Length(length) => write!(f, "{length}"),
        }
    }
}

impl ArgValue for Snapshot {
    fn from_arg(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(true) => return Ok(Self::Yes),
            Value::Bool(false) => return Ok(Self::No),
            _ => {}
        }
        if is_sentinel(value, "yes") {
            return Ok(Self::Yes);
        }
        if is_sentinel(value, "no") {
            return Ok(Self::No);
        }
        match count_arg(value) {
            Some(length) if length > 0 => Ok(Self::Length(length)),
            _ => Err(format!("expected \"yes\", \"no\" or a positive integer, got {value}")),
        }
    }
}

string_tunable!(Snapshot);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum MaxBandwidth {
    #[default]
    Unlimited,
    Limited(f64),
}

impl fmt::Display for MaxBandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Limited(kbps) => write!(f, "{kbps}"),
        }
    }
}

impl ArgValue for MaxBandwidth {
    fn from_arg(value: &Value) -> Result<Self, String> {
        if is_sentinel(value, "unlimited") {
            return Ok(Self::Unlimited);
        }
        match number_arg(value) {
            Some(kbps) if kbps > 0.0 => Ok(Self::Limited(kbps)),
            _ => Err(format!("expected \"unlimited\" or a positive number, got {value}")),
        }
    }
}

string_tunable!(MaxBandwidth);

// ── Item and field references ─────────────────────────────────────────────────

/// An item named explicitly or addressed by its 1-based position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemRef {
    Name(String),
    Position(u32),
}

/// A field named explicitly or addressed by its 1-based position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldRef {
    Name(String),
    Position(u32),
}

fn name_or_position(value: &Value) -> Result<Result<String, u32>, String> {
    match value {
        Value::String(name) => Ok(Ok(name.clone())),
        Value::Number(number) => match number.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(position) if position > 0 => Ok(Err(position)),
            _ => Err(format!("positions start at 1, got {number}")),
        },
        other => Err(format!("expected a name or a position, got {}", type_name(other))),
    }
}

impl ArgValue for ItemRef {
    fn from_arg(value: &Value) -> Result<Self, String> {
        Ok(match name_or_position(value)? {
            Ok(name) => Self::Name(name),
            Err(position) => Self::Position(position),
        })
    }
}

impl ArgValue for FieldRef {
    fn from_arg(value: &Value) -> Result<Self, String> {
        Ok(match name_or_position(value)? {
            Ok(name) => Self::Name(name),
            Err(position) => Self::Position(position),
        })
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// A credential that never shows up in logs or serialized output.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    pub server_address: Option<String>,
    pub adapter_set: Option<String>,
    pub user: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret>,
    // Assigned by the server once a session exists.
    pub server_instance_address: Option<String>,
    pub server_socket_name: Option<String>,
    pub client_ip: Option<String>,
    pub session_id: Option<String>,
}

/// Merge patch for the writable part of [`ConnectionDetails`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionDetailsPatch {
    pub server_address: Option<Option<String>>,
    pub adapter_set: Option<Option<String>>,
    pub user: Option<Option<String>>,
    pub password: Option<Option<Secret>>,
}

impl ConnectionDetailsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl ConnectionDetails {
    pub fn apply(&mut self, patch: ConnectionDetailsPatch) {
        if let Some(server_address) = patch.server_address {
            self.server_address = server_address;
        }
        if let Some(adapter_set) = patch.adapter_set {
            self.adapter_set = adapter_set;
        }
        if let Some(user) = patch.user {
            self.user = user;
        }
        if let Some(password) = patch.password {
            self.password = password;
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub content_length: u64,
    pub first_retry_max_delay: u64,
    pub forced_transport: Option<String>,
    pub http_extra_headers: Option<BTreeMap<String, String>>,
    pub http_extra_headers_on_session_creation_only: bool,
    pub idle_timeout: u64,
    pub keepalive_interval: u64,
    pub polling_interval: u64,
    pub reconnect_timeout: u64,
    pub requested_max_bandwidth: MaxBandwidth,
    /// Bandwidth granted by the server; `None` before a session exists.
    pub real_max_bandwidth: Option<String>,
    pub retry_delay: u64,
    pub reverse_heartbeat_interval: u64,
    pub server_instance_address_ignored: bool,
    pub session_recovery_timeout: u64,
    pub slowing_enabled: bool,
    pub stalled_timeout: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            content_length: 50_000_000,
            first_retry_max_delay: 100,
            forced_transport: None,
            http_extra_headers: None,
            http_extra_headers_on_session_creation_only: false,
            idle_timeout: 19_000,
            keepalive_interval: 0,
            polling_interval: 0,
            reconnect_timeout: 3_000,
            requested_max_bandwidth: MaxBandwidth::Unlimited,
            real_max_bandwidth: None,
            retry_delay: 4_000,
            reverse_heartbeat_interval: 0,
            server_instance_address_ignored: false,
            session_recovery_timeout: 15_000,
            slowing_enabled: false,
            stalled_timeout: 2_000,
        }
    }
}

/// Merge patch for [`ConnectionOptions`]. Absent fields keep their value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionOptionsPatch {
    pub content_length: Option<u64>,
    pub first_retry_max_delay: Option<u64>,
    pub forced_transport: Option<Option<String>>,
    pub http_extra_headers: Option<Option<BTreeMap<String, String>>>,
    pub http_extra_headers_on_session_creation_only: Option<bool>,
    pub idle_timeout: Option<u64>,
    pub keepalive_interval: Option<u64>,
    pub polling_interval: Option<u64>,
    pub reconnect_timeout: Option<u64>,
    pub requested_max_bandwidth: Option<MaxBandwidth>,
    pub retry_delay: Option<u64>,
    pub reverse_heartbeat_interval: Option<u64>,
    pub server_instance_address_ignored: Option<bool>,
    pub session_recovery_timeout: Option<u64>,
    pub slowing_enabled: Option<bool>,
    pub stalled_timeout: Option<u64>,
}

impl ConnectionOptionsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl ConnectionOptions {
    pub fn apply(&mut self, patch: ConnectionOptionsPatch) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        set(&mut self.content_length, patch.content_length);
        set(&mut self.first_retry_max_delay, patch.first_retry_max_delay);
        set(&mut self.forced_transport, patch.forced_transport);
        set(&mut self.http_extra_headers, patch.http_extra_headers);
        set(
            &mut self.http_extra_headers_on_session_creation_only,
            patch.http_extra_headers_on_session_creation_only,
        );
        set(&mut self.idle_timeout, patch.idle_timeout);
        set(&mut self.keepalive_interval, patch.keepalive_interval);
        set(&mut self.polling_interval, patch.polling_interval);
        set(&mut self.reconnect_timeout, patch.reconnect_timeout);
        set(
            &mut self.requested_max_bandwidth,
            patch.requested_max_bandwidth,
        );
        set(&mut self.retry_delay, patch.retry_delay);
        set(
            &mut self.reverse_heartbeat_interval,
            patch.reverse_heartbeat_interval,
        );
        set(
            &mut self.server_instance_address_ignored,
            patch.server_instance_address_ignored,
        );
        set(
            &mut self.session_recovery_timeout,
            patch.session_recovery_timeout,
        );
        set(&mut self.slowing_enabled, patch.slowing_enabled);
        set(&mut self.stalled_timeout, patch.stalled_timeout);
    }
}

// ── Subscriptions ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    pub mode: SubscriptionMode,
    pub items: Option<Vec<String>>,
    pub group: Option<String>,
    pub fields: Option<Vec<String>>,
    pub schema: Option<String>,
    pub data_adapter: Option<String>,
    pub requested_buffer_size: Option<BufferSize>,
    pub requested_snapshot: Option<Snapshot>,
    pub requested_max_frequency: Option<MaxFrequency>,
    pub selector: Option<String>,
    pub command_second_level_data_adapter: Option<String>,
    pub command_second_level_fields: Option<Vec<String>>,
    pub command_second_level_field_schema: Option<String>,
}

impl SubscriptionConfig {
    pub fn new(mode: SubscriptionMode) -> Self {
        Self {
            mode,
            items: None,
            group: None,
            fields: None,
            schema: None,
            data_adapter: None,
            requested_buffer_size: None,
            requested_snapshot: None,
            requested_max_frequency: None,
            selector: None,
            command_second_level_data_adapter: None,
            command_second_level_fields: None,
            command_second_level_field_schema: None,
        }
    }

    /// Items and group are alternatives, as are fields and schema: setting
    /// one clears the other.
    pub fn apply(&mut self, patch: SubscriptionPatch) {
        if let Some(items) = patch.items {
            self.items = Some(items);
            self.group = None;
        }
        if let Some(group) = patch.group {
            self.group = Some(group);
            self.items = None;
        }
        if let Some(fields) = patch.fields {
            self.fields = Some(fields);
            self.schema = None;
        }
        if let Some(schema) = patch.schema {
            self.schema = Some(schema);
            self.fields = None;
        }
        if let Some(data_adapter) = patch.data_adapter {
            self.data_adapter = data_adapter;
        }
        if let Some(buffer_size) = patch.requested_buffer_size {
            self.requested_buffer_size = buffer_size;
        }
        if let Some(snapshot) = patch.requested_snapshot {
            self.requested_snapshot = snapshot;
        }
        if let Some(frequency) = patch.requested_max_frequency {
            self.requested_max_frequency = frequency;
        }
        if let Some(selector) = patch.selector {
            self.selector = selector;
        }
        if let Some(adapter) = patch.command_second_level_data_adapter {
            self.command_second_level_data_adapter = adapter;
        }
        if let Some(fields) = patch.command_second_level_fields {
            self.command_second_level_fields = Some(fields);
            self.command_second_level_field_schema = None;
        }
        if let Some(schema) = patch.command_second_level_field_schema {
            self.command_second_level_field_schema = Some(schema);
            self.command_second_level_fields = None;
        }
    }

    /// 1-based position of a named field, when the field list is known.
    pub fn field_position(&self, name: &str) -> Option<u32> {
        position_of(self.fields.as_deref()?, name)
    }

    /// 1-based position of a named item, when the item list is known.
    pub fn item_position(&self, name: &str) -> Option<u32> {
        position_of(self.items.as_deref()?, name)
    }
}

fn position_of(names: &[String], name: &str) -> Option<u32> {
    let index = names.iter().position(|candidate| candidate == name)?;
    u32::try_from(index + 1).ok()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionPatch {
    pub items: Option<Vec<String>>,
    pub group: Option<String>,
    pub fields: Option<Vec<String>>,
    pub schema: Option<String>,
    pub data_adapter: Option<Option<String>>,
    pub requested_buffer_size: Option<Option<BufferSize>>,
    pub requested_snapshot: Option<Option<Snapshot>>,
    pub requested_max_frequency: Option<Option<MaxFrequency>>,
    pub selector: Option<Option<String>>,
    pub command_second_level_data_adapter: Option<Option<String>>,
    pub command_second_level_fields: Option<Vec<String>>,
    pub command_second_level_field_schema: Option<String>,
}

/// Real-time update for one item, as delivered by the backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemUpdate {
    pub item_name: Option<String>,
    pub item_pos: u32,
    pub snapshot: bool,
    /// Field names when the subscription was configured with a field list.
    pub field_names: Option<Vec<String>>,
    /// Current values, index 0 holding field position 1.
    pub values: Vec<Option<String>>,
    /// 1-based positions of the fields changed by this update.
    pub changed: Vec<u32>,
    /// JSON Patch text for fields the backend could express as a diff.
    pub json_patches: BTreeMap<u32, String>,
}

impl ItemUpdate {
    pub fn value(&self, field: &FieldRef) -> Option<&str> {
        let position = match field {
            FieldRef::Position(position) => *position,
            FieldRef::Name(name) => position_of(self.field_names.as_deref()?, name)?,
        };
        self.value_at(position)
    }

    fn value_at(&self, position: u32) -> Option<&str> {
        let index = usize::try_from(position).ok()?.checked_sub(1)?;
        self.values.get(index)?.as_deref()
    }

    fn name_at(&self, position: u32) -> Option<&str> {
        let index = usize::try_from(position).ok()?.checked_sub(1)?;
        self.field_names.as_ref()?.get(index).map(String::as_str)
    }

    fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.values.len()).filter_map(|position| u32::try_from(position).ok())
    }

    pub fn fields_by_position(&self) -> BTreeMap<u32, Option<String>> {
        self.positions()
            .map(|pos| (pos, self.value_at(pos).map(str::to_owned)))
            .collect()
    }

    pub fn changed_fields_by_position(&self) -> BTreeMap<u32, Option<String>> {
        self.changed
            .iter()
            .map(|&pos| (pos, self.value_at(pos).map(str::to_owned)))
            .collect()
    }

    pub fn json_fields_by_position(&self) -> BTreeMap<u32, String> {
        self.json_patches.clone()
    }

    /// Name-keyed maps exist only for subscriptions with a field list.
    pub fn fields(&self) -> Option<BTreeMap<String, Option<String>>> {
        self.field_names.as_ref()?;
        Some(self.by_name(self.positions(), |pos| {
            self.value_at(pos).map(str::to_owned)
        }))
    }

    pub fn changed_fields(&self) -> Option<BTreeMap<String, Option<String>>> {
        self.field_names.as_ref()?;
        Some(self.by_name(self.changed.iter().copied(), |pos| {
            self.value_at(pos).map(str::to_owned)
        }))
    }

    pub fn json_fields(&self) -> Option<BTreeMap<String, String>> {
        self.field_names.as_ref()?;
        let by_name = self
            .json_patches
            .iter()
            .filter_map(|(&pos, patch)| {
                self.name_at(pos)
                    .map(|name| (name.to_owned(), patch.clone()))
            })
            .collect();
        Some(by_name)
    }

    fn by_name<V>(
        &self,
        positions: impl Iterator<Item = u32>,
        value: impl Fn(u32) -> V,
    ) -> BTreeMap<String, V> {
        positions
            .filter_map(|pos| self.name_at(pos).map(|name| (name.to_owned(), value(pos))))
            .collect()
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub message: String,
    pub sequence: Option<String>,
    /// Milliseconds; negative means the server default.
    pub delay_timeout: i64,
    pub enqueue_while_disconnected: bool,
}

impl OutgoingMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sequence: None,
            delay_timeout: -1,
            enqueue_while_disconnected: false,
        }
    }
}

// ── Mobile push notifications ─────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MpnSubscriptionConfig {
    pub mode: SubscriptionMode,
    pub items: Option<Vec<String>>,
    pub group: Option<String>,
    pub fields: Option<Vec<String>>,
    pub schema: Option<String>,
    pub data_adapter: Option<String>,
    pub requested_buffer_size: Option<BufferSize>,
    pub requested_max_frequency: Option<MaxFrequency>,
    pub trigger_expression: Option<String>,
    pub notification_format: Option<String>,
}

impl MpnSubscriptionConfig {
    pub fn new(mode: SubscriptionMode) -> Self {
        Self {
            mode,
            items: None,
            group: None,
            fields: None,
            schema: None,
            data_adapter: None,
            requested_buffer_size: None,
            requested_max_frequency: None,
            trigger_expression: None,
            notification_format: None,
        }
    }

    pub fn apply(&mut self, patch: MpnSubscriptionPatch) {
        if let Some(items) = patch.items {
            self.items = Some(items);
            self.group = None;
        }
        if let Some(group) = patch.group {
            self.group = Some(group);
            self.items = None;
        }
        if let Some(fields) = patch.fields {
            self.fields = Some(fields);
            self.schema = None;
        }
        if let Some(schema) = patch.schema {
            self.schema = Some(schema);
            self.fields = None;
        }
        if let Some(data_adapter) = patch.data_adapter {
            self.data_adapter = data_adapter;
        }
        if let Some(buffer_size) = patch.requested_buffer_size {
            self.requested_buffer_size = buffer_size;
        }
        if let Some(frequency) = patch.requested_max_frequency {
            self.requested_max_frequency = frequency;
        }
        if let Some(trigger) = patch.trigger_expression {
            self.trigger_expression = trigger;
        }
        if let Some(format) = patch.notification_format {
            self.notification_format = Some(format);
        }
    }

    /// Two configurations address the same server-side subscription when
    /// everything but the requested tunables matches.
    pub fn same_target(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.items == other.items
            && self.group == other.group
            && self.fields == other.fields
            && self.schema == other.schema
            && self.data_adapter == other.data_adapter
            && self.trigger_expression == other.trigger_expression
            && self.notification_format == other.notification_format
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MpnSubscriptionPatch {
    pub items: Option<Vec<String>>,
    pub group: Option<String>,
    pub fields: Option<Vec<String>>,
    pub schema: Option<String>,
    pub data_adapter: Option<Option<String>>,
    pub requested_buffer_size: Option<Option<BufferSize>>,
    pub requested_max_frequency: Option<Option<MaxFrequency>>,
    pub trigger_expression: Option<Option<String>>,
    pub notification_format: Option<String>,
}

/// Full state of an MPN subscription, sent once when the gateway discovers a
/// server-side subscription the frontend has never seen.
///
/// Every field is always present on the wire; unknown values are `null`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MpnSubscriptionSnapshot {
    pub id: Handle,
    pub mode: SubscriptionMode,
    pub items: Option<Vec<String>>,
    pub fields: Option<Vec<String>>,
    pub group: Option<String>,
    pub schema: Option<String>,
    pub data_adapter: Option<String>,
    pub buffer_size: Option<BufferSize>,
    pub requested_max_frequency: Option<MaxFrequency>,
    pub notification_format: Option<String>,
    pub trigger: Option<String>,
    pub actual_notification_format: Option<String>,
    pub actual_trigger: Option<String>,
    pub status_ts: i64,
    pub status: String,
    pub subscription_id: Option<String>,
}
