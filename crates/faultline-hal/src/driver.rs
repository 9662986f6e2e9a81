use faultline_protocol::types::{GlitchParameter, ProtocolPacket};
use serde::{Deserialize, Serialize};

use crate::config::HardwareConfig;

#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Driver command '{operation}' failed: {details}")]
    Driver {
        operation: &'static str,
        details: String,
    },

    #[error("Transport error: {details}")]
    Transport { details: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which glitch output a parameter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlitchChannel {
    /// Clock glitch triggered off the command-bus match.
    CommandBus,
    /// Supply-rail glitch triggered off the reset edge.
    PowerRail,
}

/// Drive state of a control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineState {
    /// Driven to the active level (reset held, power line pulled).
    Asserted,
    /// Driven to the inactive level.
    Deasserted,
    /// Not driven; the target's own pull resistors decide.
    HighImpedance,
}

impl LineState {
    pub fn is_asserted(&self) -> bool {
        matches!(self, LineState::Asserted)
    }
}

/// Glitch generator and target control lines.
///
/// Every call is treated as fatal by the engine if it fails.
pub trait GlitchDriver {
    /// One-time hardware setup. Called once before any sweep.
    fn configure(&mut self, _config: &HardwareConfig) -> Result<(), HalError> {
        Ok(())
    }

    fn arm(&mut self, channel: GlitchChannel, parameter: GlitchParameter) -> Result<(), HalError>;

    fn set_reset(&mut self, state: LineState) -> Result<(), HalError>;

    fn set_power(&mut self, state: LineState) -> Result<(), HalError>;
}

/// Passive command-bus capture. Non-blocking.
pub trait PacketBus {
    /// Packets buffered and ready to read.
    fn pending(&mut self) -> Result<usize, HalError>;

    /// Read the oldest buffered packet. Only valid when `pending() > 0`.
    fn read_next(&mut self) -> Result<ProtocolPacket, HalError>;
}

/// Target UART. Non-blocking.
pub trait SerialPort {
    fn bytes_available(&mut self) -> Result<usize, HalError>;

    /// Read up to `n` buffered bytes.
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, HalError>;

    /// Discard anything buffered.
    fn clear(&mut self) -> Result<(), HalError> {
        loop {
            let available = self.bytes_available()?;
            if available == 0 {
                return Ok(());
            }
            self.read_bytes(available)?;
        }
    }
}

impl<T: GlitchDriver + ?Sized> GlitchDriver for &mut T {
    fn configure(&mut self, config: &HardwareConfig) -> Result<(), HalError> {
        (**self).configure(config)
    }

    fn arm(&mut self, channel: GlitchChannel, parameter: GlitchParameter) -> Result<(), HalError> {
        (**self).arm(channel, parameter)
    }

    fn set_reset(&mut self, state: LineState) -> Result<(), HalError> {
        (**self).set_reset(state)
    }

    fn set_power(&mut self, state: LineState) -> Result<(), HalError> {
        (**self).set_power(state)
    }
}

impl<T: PacketBus + ?Sized> PacketBus for &mut T {
    fn pending(&mut self) -> Result<usize, HalError> {
        (**self).pending()
    }

    fn read_next(&mut self) -> Result<ProtocolPacket, HalError> {
        (**self).read_next()
    }
}

impl<T: SerialPort + ?Sized> SerialPort for &mut T {
    fn bytes_available(&mut self) -> Result<usize, HalError> {
        (**self).bytes_available()
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, HalError> {
        (**self).read_bytes(n)
    }

    fn clear(&mut self) -> Result<(), HalError> {
        (**self).clear()
    }
}

/// The three collaborators a campaign owns exclusively while it runs.
pub struct Rig<D, B, S> {
    pub driver: D,
    pub bus: B,
    pub serial: S,
}

impl<D: GlitchDriver, B: PacketBus, S: SerialPort> Rig<D, B, S> {
    pub fn new(driver: D, bus: B, serial: S) -> Self {
        Self {
            driver,
            bus,
            serial,
        }
    }

    /// Read and discard every buffered packet, returning the last one seen.
    pub fn drain_packets(&mut self) -> Result<Option<ProtocolPacket>, HalError> {
        let mut last = None;
        while self.bus.pending()? > 0 {
            let packet = self.bus.read_next()?;
            tracing::trace!(%packet, "stale");
            last = Some(packet);
        }
        Ok(last)
    }
}
