pub mod config;
pub mod driver;
pub mod sim;

pub use driver::{GlitchChannel, GlitchDriver, HalError, LineState, PacketBus, Rig, SerialPort};
