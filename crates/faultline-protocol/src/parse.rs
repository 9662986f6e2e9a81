use serde::{Deserialize, Serialize};

use crate::types::ProtocolPacket;

#[derive(Debug, thiserror::Error)]
pub enum PacketTraceError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A recorded sequence of command-bus packets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketTrace {
    #[serde(default)]
    pub description: Option<String>,
    pub packets: Vec<ProtocolPacket>,
}

pub fn parse_packet_trace(json: &str) -> Result<PacketTrace, PacketTraceError> {
    Ok(serde_json::from_str(json)?)
}
