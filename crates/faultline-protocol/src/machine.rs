//! Boot-progress classifier.
//!
//! `advance` is a pure transition function over `(state, packet)`. Counters
//! that span a whole attempt live in [`AttemptCounters`], which the caller owns
//! and threads through explicitly.

use serde::{Deserialize, Serialize};

use crate::types::{BootState, Command, ProtocolPacket};

/// Block address of the master boot record.
pub const MBR_BLOCK: u32 = 0x0;
/// Block address the boot ROM loads the next stage from.
pub const PAYLOAD_BLOCK: u32 = 0x8000;
/// Content observed once the payload read runs past its buffer.
pub const OVERFLOW_MARKER: u32 = 0x80E1;

/// Compute the next boot state. Responses never change state, and terminal
/// states are absorbing.
pub fn advance(state: BootState, packet: &ProtocolPacket) -> BootState {
    if !packet.is_request {
        return state;
    }

    match (state, packet.command) {
        (BootState::BootStarted, Command::ReadSingleBlock) if packet.content == MBR_BLOCK => {
            BootState::ReadMbr
        }

        (BootState::ReadMbr, Command::SendStatus) => BootState::ReadMbrStatus,
        (BootState::ReadMbr, Command::GoIdleState) => BootState::Restarted,
        (BootState::ReadMbr, Command::ReadSingleBlock) => BootState::UnexpectedRead,
        (BootState::ReadMbr, _) => BootState::UnexpectedPacket,

        (BootState::ReadMbrStatus, Command::GoIdleState) => BootState::Restarted,
        (BootState::ReadMbrStatus, Command::ReadSingleBlock) => {
            if packet.content == PAYLOAD_BLOCK {
                BootState::LoadingPayload
            } else {
                BootState::UnexpectedRead
            }
        }
        (BootState::ReadMbrStatus, _) => BootState::UnexpectedPacket,

        (BootState::LoadingPayload, _) if packet.content == OVERFLOW_MARKER => {
            BootState::Overflowed
        }

        (unchanged, _) => unchanged,
    }
}

/// Per-attempt request counters, independent of state transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounters {
    /// GO_IDLE_STATE requests seen (card re-initialisations).
    pub restarts: u32,
    /// READ_SINGLE_BLOCK requests seen.
    pub reads: u32,
}

impl AttemptCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a packet. Responses are ignored.
    pub fn observe(&mut self, packet: &ProtocolPacket) {
        if !packet.is_request {
            return;
        }
        match packet.command {
            Command::GoIdleState => self.restarts += 1,
            Command::ReadSingleBlock => self.reads += 1,
            _ => {}
        }
    }
}

/// Fold a sequence of packets from `BOOT_STARTED`, returning the final state
/// and counters.
pub fn classify<'a, I>(packets: I) -> (BootState, AttemptCounters)
where
    I: IntoIterator<Item = &'a ProtocolPacket>,
{
    let mut counters = AttemptCounters::new();
    let state = packets
        .into_iter()
        .fold(BootState::BootStarted, |state, packet| {
            counters.observe(packet);
            advance(state, packet)
        });
    (state, counters)
}
