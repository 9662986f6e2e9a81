use std::fmt;

use serde::{Deserialize, Serialize};

/// One trial point of a glitch sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlitchParameter {
    /// Delay from the trigger to the glitch, in glitch-clock cycles.
    pub offset: u32,
    /// Pulse width (repeat count), in glitch-clock cycles.
    pub width: u32,
}

impl GlitchParameter {
    pub const fn new(offset: u32, width: u32) -> Self {
        Self { offset, width }
    }
}

impl fmt::Display for GlitchParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset {}, width {}", self.offset, self.width)
    }
}

// ── Command bus packets ──────────────────────────────────────────────

/// Storage-protocol commands the boot classifier cares about.
///
/// Everything else is carried through as `Other` with its raw index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    GoIdleState,
    ReadSingleBlock,
    SendStatus,
    Other(u8),
}

impl Command {
    pub const GO_IDLE_STATE_INDEX: u8 = 0;
    pub const SEND_STATUS_INDEX: u8 = 13;
    pub const READ_SINGLE_BLOCK_INDEX: u8 = 17;

    /// Map a raw command index (CMDn) to a command.
    pub fn from_index(index: u8) -> Self {
        match index {
            Self::GO_IDLE_STATE_INDEX => Command::GoIdleState,
            Self::SEND_STATUS_INDEX => Command::SendStatus,
            Self::READ_SINGLE_BLOCK_INDEX => Command::ReadSingleBlock,
            other => Command::Other(other),
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            Command::GoIdleState => Self::GO_IDLE_STATE_INDEX,
            Command::SendStatus => Self::SEND_STATUS_INDEX,
            Command::ReadSingleBlock => Self::READ_SINGLE_BLOCK_INDEX,
            Command::Other(index) => *index,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::GoIdleState => "GO_IDLE_STATE",
            Command::ReadSingleBlock => "READ_SINGLE_BLOCK",
            Command::SendStatus => "SEND_STATUS",
            Command::Other(_) => "OTHER",
        }
    }
}

/// A packet captured off the command bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolPacket {
    /// Free-running capture counter; wraps at 16 bits.
    pub seq: u16,
    /// `true` for host-to-card requests, `false` for responses.
    pub is_request: bool,
    pub command: Command,
    /// Command argument (requests) or response content.
    pub content: u32,
}

impl ProtocolPacket {
    pub fn request(seq: u16, command: Command, content: u32) -> Self {
        Self {
            seq,
            is_request: true,
            command,
            content,
        }
    }

    pub fn response(seq: u16, command: Command, content: u32) -> Self {
        Self {
            seq,
            is_request: false,
            command,
            content,
        }
    }
}

impl fmt::Display for ProtocolPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.is_request { "REQ" } else { "RSP" };
        write!(
            f,
            "#{:05} {} CMD{:02} {:<17} 0x{:08x}",
            self.seq,
            direction,
            self.command.index(),
            self.command.name(),
            self.content
        )
    }
}

// ── Boot progress ────────────────────────────────────────────────────

/// Where the target's boot sequence is, as inferred from bus traffic.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BootState {
    #[default]
    BootStarted,
    ReadMbr,
    ReadMbrStatus,
    UnexpectedRead,
    UnexpectedPacket,
    LoadingPayload,
    Overflowed,
    Restarted,
}

impl BootState {
    pub const ALL: [BootState; 8] = [
        BootState::BootStarted,
        BootState::ReadMbr,
        BootState::ReadMbrStatus,
        BootState::UnexpectedRead,
        BootState::UnexpectedPacket,
        BootState::LoadingPayload,
        BootState::Overflowed,
        BootState::Restarted,
    ];

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BootState::Overflowed
                | BootState::Restarted
                | BootState::UnexpectedRead
                | BootState::UnexpectedPacket
        )
    }

    pub fn is_unexpected(&self) -> bool {
        matches!(self, BootState::UnexpectedRead | BootState::UnexpectedPacket)
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootState::BootStarted => "BOOT_STARTED",
            BootState::ReadMbr => "READ_MBR",
            BootState::ReadMbrStatus => "READ_MBR_STATUS",
            BootState::UnexpectedRead => "UNEXPECTED_READ",
            BootState::UnexpectedPacket => "UNEXPECTED_PACKET",
            BootState::LoadingPayload => "LOADING_PAYLOAD",
            BootState::Overflowed => "OVERFLOWED",
            BootState::Restarted => "RESTARTED",
        };
        f.write_str(name)
    }
}
