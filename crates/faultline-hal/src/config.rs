//! Hardware configuration: clocks, trigger match, serial line settings.

use serde::{Deserialize, Serialize};

/// One-time setup handed to the glitch driver before a campaign runs.
///
/// The core only reads `sysclk_hz` and `counter_prescale` (packet timestamps);
/// everything else is passed through to [`GlitchDriver::configure`].
///
/// [`GlitchDriver::configure`]: crate::driver::GlitchDriver::configure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Capture/glitch system clock (default: 96 MHz).
    pub sysclk_hz: u64,
    /// Clock fed to the target (default: 12 MHz).
    pub target_clock_hz: u64,
    /// Target UART baud rate.
    pub uart_baud: u32,
    /// Capture clock cycles per sequence-counter tick.
    pub counter_prescale: u32,
    /// Bus match that fires the command-bus glitch.
    pub trigger: TriggerConfig,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            sysclk_hz: 96_000_000,
            target_clock_hz: 12_000_000,
            uart_baud: 28985,
            counter_prescale: 0x100,
            trigger: TriggerConfig::default(),
        }
    }
}

/// Command-bus trigger: fire on a request with this command index and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub command_index: u8,
    pub content: u32,
    /// Re-arm on the next match after firing.
    pub trigger_next: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            command_index: 17, // READ_SINGLE_BLOCK
            content: 0,
            trigger_next: true,
        }
    }
}
