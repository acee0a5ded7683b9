use pushgate_ipc::{
    ArgBag, ConnectionDetailsPatch, ConnectionOptionsPatch, GatewayError, MaxBandwidth, Secret,
};

use super::{done, required, Dispatcher, Outcome};

/// Merge patch from a `connectionDetails` bag. Absent keys are untouched;
/// explicit `null` clears.
pub(super) fn details_patch(bag: &ArgBag) -> Result<ConnectionDetailsPatch, GatewayError> {
    Ok(ConnectionDetailsPatch {
        server_address: bag.nullable_str("serverAddress")?,
        adapter_set: bag.nullable_str("adapterSet")?,
        user: bag.nullable_str("user")?,
        password: bag
            .nullable_str("password")?
            .map(|password| password.map(Secret::new)),
    })
}

pub(super) fn options_patch(bag: &ArgBag) -> Result<ConnectionOptionsPatch, GatewayError> {
    let http_extra_headers = if bag.contains("httpExtraHeaders") {
        Some(bag.str_map("httpExtraHeaders")?)
    } else {
        None
    };
    Ok(ConnectionOptionsPatch {
        content_length: bag.u64("contentLength")?,
        first_retry_max_delay: bag.u64("firstRetryMaxDelay")?,
        forced_transport: bag.nullable_str("forcedTransport")?,
        http_extra_headers,
        http_extra_headers_on_session_creation_only: bag
            .bool("httpExtraHeadersOnSessionCreationOnly")?,
        idle_timeout: bag.u64("idleTimeout")?,
        keepalive_interval: bag.u64("keepaliveInterval")?,
        polling_interval: bag.u64("pollingInterval")?,
        reconnect_timeout: bag.u64("reconnectTimeout")?,
        requested_max_bandwidth: bag.parsed("requestedMaxBandwidth")?,
        retry_delay: bag.u64("retryDelay")?,
        reverse_heartbeat_interval: bag.u64("reverseHeartbeatInterval")?,
        server_instance_address_ignored: bag.bool("serverInstanceAddressIgnored")?,
        session_recovery_timeout: bag.u64("sessionRecoveryTimeout")?,
        slowing_enabled: bag.bool("slowingEnabled")?,
        stalled_timeout: bag.u64("stalledTimeout")?,
    })
}

impl Dispatcher {
    pub(super) fn connection_details_command(&self, operation: &str, args: &ArgBag) -> Outcome {
        match operation {
            "setServerAddress" => {
                let (_, client) = self.lookup_client(args)?;
                client.update_connection_details(ConnectionDetailsPatch {
                    server_address: Some(args.str("newVal")?),
                    ..ConnectionDetailsPatch::default()
                })?;
                done()
            }
            _ => Ok(None),
        }
    }

    pub(super) fn connection_options_command(&self, operation: &str, args: &ArgBag) -> Outcome {
        let patch = match operation {
            "setForcedTransport" => ConnectionOptionsPatch {
                forced_transport: Some(args.str("newVal")?),
                ..ConnectionOptionsPatch::default()
            },
            "setRequestedMaxBandwidth" => ConnectionOptionsPatch {
                requested_max_bandwidth: Some(
                    args.parsed::<MaxBandwidth>("newVal")?.unwrap_or_default(),
                ),
                ..ConnectionOptionsPatch::default()
            },
            "setReverseHeartbeatInterval" => ConnectionOptionsPatch {
                reverse_heartbeat_interval: Some(required(args.u64("newVal")?, "newVal")?),
                ..ConnectionOptionsPatch::default()
            },
            _ => return Ok(None),
        };
        let (_, client) = self.lookup_client(args)?;
        client.update_connection_options(patch)?;
        done()
    }
}
