//! Scripted in-memory target.
//!
//! Stands in for the glitch generator, bus capture and UART so the engine can
//! run without hardware (tests, dry runs). Every time reset is released the
//! target "boots": a responder closure looks at the currently armed glitches
//! and returns the bus packets and serial bytes that boot produces.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use faultline_protocol::types::{Command, GlitchParameter, ProtocolPacket};

use crate::config::HardwareConfig;
use crate::driver::{GlitchChannel, GlitchDriver, HalError, LineState, PacketBus, Rig, SerialPort};

/// Glitch parameters armed at the moment the target boots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmedGlitches {
    pub command_bus: Option<GlitchParameter>,
    pub power_rail: Option<GlitchParameter>,
}

/// What one boot of the simulated target emits.
///
/// Packet sequence counters are stamped by the target, so the `seq` of
/// scripted packets is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootScript {
    pub packets: Vec<ProtocolPacket>,
    pub serial: Vec<u8>,
}

impl BootScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, command: Command, content: u32) -> Self {
        self.packets.push(ProtocolPacket::request(0, command, content));
        self
    }

    pub fn response(mut self, command: Command, content: u32) -> Self {
        self.packets.push(ProtocolPacket::response(0, command, content));
        self
    }

    pub fn serial(mut self, bytes: &[u8]) -> Self {
        self.serial.extend_from_slice(bytes);
        self
    }
}

/// Driver calls recorded by the simulated target, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Configure,
    Arm(GlitchChannel, GlitchParameter),
    Reset(LineState),
    Power(LineState),
}

type Responder = Box<dyn FnMut(&ArmedGlitches) -> BootScript>;

struct SimState {
    responder: Responder,
    armed: ArmedGlitches,
    reset: LineState,
    packets: VecDeque<ProtocolPacket>,
    serial: VecDeque<u8>,
    serial_chunk: Option<usize>,
    counter: u16,
    tick_step: u16,
    calls: Vec<DriverCall>,
    failing: Option<&'static str>,
    boots: u32,
}

impl SimState {
    fn check(&self, operation: &'static str) -> Result<(), HalError> {
        if self.failing == Some(operation) {
            return Err(HalError::Driver {
                operation,
                details: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn boot(&mut self) {
        let script = (self.responder)(&self.armed);
        for mut packet in script.packets {
            self.counter = self.counter.wrapping_add(self.tick_step);
            packet.seq = self.counter;
            self.packets.push_back(packet);
        }
        self.serial.extend(script.serial);
        self.boots += 1;
    }
}

/// Shared handle to a simulated target. Clones refer to the same target.
#[derive(Clone)]
pub struct SimulatedTarget {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedTarget {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&ArmedGlitches) -> BootScript + 'static,
    {
        Self {
            state: Rc::new(RefCell::new(SimState {
                responder: Box::new(responder),
                armed: ArmedGlitches::default(),
                reset: LineState::Deasserted,
                packets: VecDeque::new(),
                serial: VecDeque::new(),
                serial_chunk: None,
                counter: 0,
                tick_step: 1,
                calls: Vec::new(),
                failing: None,
                boots: 0,
            })),
        }
    }

    /// A target that never produces any traffic.
    pub fn silent() -> Self {
        Self::new(|_| BootScript::new())
    }

    /// Deliver serial data at most `chunk` bytes per poll.
    pub fn with_serial_chunk(self, chunk: usize) -> Self {
        self.state.borrow_mut().serial_chunk = Some(chunk.max(1));
        self
    }

    /// Start the sequence counter at `start` and advance it by `step` per packet.
    pub fn with_counter(self, start: u16, step: u16) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.counter = start;
            state.tick_step = step;
        }
        self
    }

    /// Fail every subsequent call of the named driver operation
    /// (`"configure"`, `"arm"`, `"set_reset"`, `"set_power"`, `"read_next"`).
    pub fn fail_on(&self, operation: &'static str) {
        self.state.borrow_mut().failing = Some(operation);
    }

    pub fn rig(&self) -> Rig<SimDriver, SimBus, SimSerial> {
        Rig::new(
            SimDriver {
                state: Rc::clone(&self.state),
            },
            SimBus {
                state: Rc::clone(&self.state),
            },
            SimSerial {
                state: Rc::clone(&self.state),
            },
        )
    }

    pub fn push_packets<I: IntoIterator<Item = ProtocolPacket>>(&self, packets: I) {
        self.state.borrow_mut().packets.extend(packets);
    }

    pub fn push_serial(&self, bytes: &[u8]) {
        self.state.borrow_mut().serial.extend(bytes.iter().copied());
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.borrow().calls.clone()
    }

    pub fn armed(&self) -> ArmedGlitches {
        self.state.borrow().armed
    }

    pub fn pending_packets(&self) -> usize {
        self.state.borrow().packets.len()
    }

    pub fn serial_buffered(&self) -> usize {
        self.state.borrow().serial.len()
    }

    /// Number of times the target has come out of reset.
    pub fn boots(&self) -> u32 {
        self.state.borrow().boots
    }
}

pub struct SimDriver {
    state: Rc<RefCell<SimState>>,
}

impl GlitchDriver for SimDriver {
    fn configure(&mut self, _config: &HardwareConfig) -> Result<(), HalError> {
        let mut state = self.state.borrow_mut();
        state.check("configure")?;
        state.calls.push(DriverCall::Configure);
        Ok(())
    }

    fn arm(&mut self, channel: GlitchChannel, parameter: GlitchParameter) -> Result<(), HalError> {
        let mut state = self.state.borrow_mut();
        state.check("arm")?;
        state.calls.push(DriverCall::Arm(channel, parameter));
        match channel {
            GlitchChannel::CommandBus => state.armed.command_bus = Some(parameter),
            GlitchChannel::PowerRail => state.armed.power_rail = Some(parameter),
        }
        Ok(())
    }

    fn set_reset(&mut self, line: LineState) -> Result<(), HalError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.check("set_reset")?;
        state.calls.push(DriverCall::Reset(line));
        let was_held = state.reset.is_asserted();
        state.reset = line;
        if was_held && !line.is_asserted() {
            state.boot();
        }
        Ok(())
    }

    fn set_power(&mut self, line: LineState) -> Result<(), HalError> {
        let mut state = self.state.borrow_mut();
        state.check("set_power")?;
        state.calls.push(DriverCall::Power(line));
        Ok(())
    }
}

pub struct SimBus {
    state: Rc<RefCell<SimState>>,
}

impl PacketBus for SimBus {
    fn pending(&mut self) -> Result<usize, HalError> {
        Ok(self.state.borrow().packets.len())
    }

    fn read_next(&mut self) -> Result<ProtocolPacket, HalError> {
        let mut state = self.state.borrow_mut();
        state.check("read_next")?;
        state.packets.pop_front().ok_or_else(|| HalError::Transport {
            details: "read with no packet pending".to_string(),
        })
    }
}

pub struct SimSerial {
    state: Rc<RefCell<SimState>>,
}

impl SerialPort for SimSerial {
    fn bytes_available(&mut self) -> Result<usize, HalError> {
        let state = self.state.borrow();
        let buffered = state.serial.len();
        Ok(state.serial_chunk.map_or(buffered, |chunk| buffered.min(chunk)))
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, HalError> {
        let mut state = self.state.borrow_mut();
        let take = n.min(state.serial.len());
        Ok(state.serial.drain(..take).collect())
    }
}
