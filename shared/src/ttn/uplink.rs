use serde::{Deserialize, Serialize};

/// One uplink event as published on the inserted-data exchange. Only the
/// fields this service consumes are modeled; everything else on the wire is
/// ignored.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UplinkMessage {
    /// Arrival time, nanoseconds since the Unix epoch.
    pub time: i64,
    /// Declared radio frequency in Hertz.
    pub frequency: u64,
    pub gateways: Vec<GatewayReport>,
}

/// One gateway's report within an uplink message.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GatewayReport {
    /// Absent from current uplinks; packet broker metadata will provide it.
    #[serde(default)]
    pub network_id: String,
    pub gateway_id: String,
    pub antenna_index: i32,
    /// Stamped from the parent message during processing.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}
