//! Best-effort LAN discovery broadcast: lets a sink find this device's
//! signaling server without the user typing in an IP address. Entirely
//! informational — nothing in the pipeline depends on it being received.

use serde::Serialize;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

const DISCOVERY_PORT: u16 = 8081;
const BROADCAST_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct DiscoveryPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    ip: &'a str,
    port: u16,
    name: &'a str,
}

/// Runs until cancelled. Socket setup failures are logged once and end the
/// loop rather than panicking — discovery is a convenience, not a
/// dependency of the streaming pipeline.
pub async fn run(bind_ip: String, server_port: u16, device_name: String) {
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "discovery broadcaster failed to bind, disabling");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!(error = %e, "failed to enable broadcast, disabling discovery");
        return;
    }

    let payload = DiscoveryPayload {
        kind: "FITNESS_MIRROR_DISCOVERY",
        ip: &bind_ip,
        port: server_port,
        name: &device_name,
    };
    let Ok(json) = serde_json::to_vec(&payload) else {
        warn!("failed to serialize discovery payload, disabling");
        return;
    };

    let target = (std::net::Ipv4Addr::BROADCAST, DISCOVERY_PORT);
    let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
    loop {
        ticker.tick().await;
        match socket.send_to(&json, target).await {
            Ok(_) => debug!("discovery broadcast sent"),
            Err(e) => warn!(error = %e, "discovery broadcast failed"),
        }
    }
}
