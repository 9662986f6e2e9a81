use std::cell::Cell;
use std::io::Write;
use std::time::Duration;

use faultline_hal::{HalError, PacketBus, SerialPort};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::error::SweepError;
use crate::event_loop::{run_until, Control, LoopOutcome, WaitPolicy};
use crate::hexdump::{hexdump, ROW_LEN};

/// First byte of the validation prefix that counts toward the checksum.
/// Bytes before it are the transport's fixed handshake.
pub const CHECKSUM_START: usize = 4;

/// Knobs for reading the payload off the serial line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePolicy {
    /// Silence tolerated between serial chunks.
    pub wait: WaitPolicy,
    /// Stop dumping once this many bytes have been captured.
    pub payload_cap: usize,
    /// Bytes that must arrive before the payload is judged real.
    pub validate_prefix: usize,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::new(100, Duration::from_millis(100)),
            payload_cap: 0x1000,
            validate_prefix: 16,
        }
    }
}

/// Bytes dumped after a successful glitch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPayload {
    pub bytes: Vec<u8>,
    /// The cap was reached; false when the target went quiet first.
    pub complete: bool,
}

impl CapturedPayload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// True when the prefix carries anything beyond the all-zero no-op pattern.
pub fn looks_like_payload(prefix: &[u8]) -> bool {
    prefix.iter().skip(CHECKSUM_START).any(|&b| b != 0)
}

/// Reads the post-glitch serial stream: first a short prefix to judge
/// whether anything real arrived, then the full dump.
///
/// Bus packets still arriving during the dump are drained and logged.
pub struct PayloadCapture<'a, B, S> {
    bus: &'a mut B,
    serial: &'a mut S,
    policy: &'a CapturePolicy,
    cancel: &'a CancelToken,
    /// Bytes read by `wait_for_data` and not yet handed to a dump.
    queue: Vec<u8>,
}

impl<'a, B: PacketBus, S: SerialPort> PayloadCapture<'a, B, S> {
    pub fn new(
        bus: &'a mut B,
        serial: &'a mut S,
        policy: &'a CapturePolicy,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            bus,
            serial,
            policy,
            cancel,
            queue: Vec::new(),
        }
    }

    /// Block until the validation prefix has arrived and judge it.
    ///
    /// Running out of idle budget first is fatal: a glitch that reached the
    /// overflow but produced no serial output points at a rig problem.
    pub fn wait_for_data(&mut self) -> Result<bool, SweepError> {
        info!("glitch successful, waiting for serial data");
        self.queue.clear();
        let needed = self.policy.validate_prefix;

        let serial = &mut *self.serial;
        let queue = &mut self.queue;
        let outcome = run_until(
            || -> Result<Option<Vec<u8>>, HalError> {
                let available = serial.bytes_available()?;
                if available > 0 {
                    serial.read_bytes(available).map(Some)
                } else {
                    Ok(None)
                }
            },
            |chunk| {
                queue.extend_from_slice(&chunk);
                if queue.len() >= needed {
                    Control::StopSuccess(())
                } else {
                    Control::Continue
                }
            },
            &self.policy.wait,
            self.cancel,
        )?;

        match outcome {
            LoopOutcome::Succeeded(()) | LoopOutcome::Failed(()) => {}
            LoopOutcome::TimedOut => {
                return Err(SweepError::CaptureTimeout {
                    received: self.queue.len(),
                    needed,
                })
            }
            LoopOutcome::Cancelled => return Err(SweepError::Cancelled),
        }

        let prefix = &self.queue[..needed];
        info!("validation prefix\n{}", hexdump(prefix, 0).trim_end());
        Ok(looks_like_payload(prefix))
    }

    /// Dump up to the payload cap into `sink`, flushing after every chunk.
    ///
    /// Bytes already read by [`wait_for_data`](Self::wait_for_data) are
    /// written first. A quiet target ends the dump early with a partial
    /// payload rather than an error.
    pub fn dump_payload<W: Write>(&mut self, sink: &mut W) -> Result<CapturedPayload, SweepError> {
        let cap = self.policy.payload_cap;
        let mut bytes: Vec<u8> = Vec::with_capacity(cap);
        let mut logged = 0usize;

        let head_len = self.queue.len().min(cap);
        let head: Vec<u8> = self.queue.drain(..).take(head_len).collect();
        if !head.is_empty() {
            sink.write_all(&head)?;
            sink.flush()?;
            bytes.extend_from_slice(&head);
            log_rows(&bytes, &mut logged, false);
        }
        if bytes.len() >= cap {
            return Ok(CapturedPayload {
                bytes,
                complete: true,
            });
        }

        let captured = Cell::new(bytes.len());
        let mut sink_error = None;
        let bus = &mut *self.bus;
        let serial = &mut *self.serial;

        let outcome = run_until(
            || -> Result<Option<Vec<u8>>, HalError> {
                while bus.pending()? > 0 {
                    let packet = bus.read_next()?;
                    trace!(%packet, "bus traffic during dump");
                }
                let available = serial.bytes_available()?;
                if available > 0 {
                    let want = available.min(cap - captured.get());
                    serial.read_bytes(want).map(Some)
                } else {
                    Ok(None)
                }
            },
            |chunk| {
                if let Err(e) = sink.write_all(&chunk).and_then(|()| sink.flush()) {
                    sink_error = Some(e);
                    return Control::StopFailure(());
                }
                bytes.extend_from_slice(&chunk);
                captured.set(bytes.len());
                log_rows(&bytes, &mut logged, false);
                if bytes.len() >= cap {
                    Control::StopSuccess(())
                } else {
                    Control::Continue
                }
            },
            &self.policy.wait,
            self.cancel,
        )?;

        if let Some(e) = sink_error {
            return Err(SweepError::Sink(e));
        }
        log_rows(&bytes, &mut logged, true);

        let complete = match outcome {
            LoopOutcome::Succeeded(()) => true,
            LoopOutcome::Failed(()) => false,
            LoopOutcome::TimedOut => {
                warn!(
                    captured = bytes.len(),
                    cap, "serial line went quiet before the dump completed"
                );
                false
            }
            LoopOutcome::Cancelled => return Err(SweepError::Cancelled),
        };

        Ok(CapturedPayload { bytes, complete })
    }
}

/// Log every complete row past `logged`; with `flush`, the trailing partial
/// row as well.
fn log_rows(bytes: &[u8], logged: &mut usize, flush: bool) {
    while bytes.len() - *logged >= ROW_LEN || (flush && bytes.len() > *logged) {
        let end = (*logged + ROW_LEN).min(bytes.len());
        debug!("{}", hexdump(&bytes[*logged..end], *logged).trim_end());
        *logged = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zero_prefix_is_not_payload() {
        assert!(!looks_like_payload(&[0u8; 16]));
    }

    #[test]
    fn test_nonzero_checksum_byte_is_payload() {
        let mut prefix = [0u8; 16];
        prefix[4] = 1;
        assert!(looks_like_payload(&prefix));
    }

    #[test]
    fn test_handshake_bytes_are_ignored() {
        let mut prefix = [0u8; 16];
        prefix[..4].copy_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        assert!(!looks_like_payload(&prefix));
    }

    #[test]
    fn test_checksum_does_not_overflow() {
        assert!(looks_like_payload(&[0xffu8; 16]));
    }

    #[test]
    fn test_oversized_prefix() {
        assert!(looks_like_payload(&vec![0xffu8; 20_000_000]));

        let mut quiet = vec![0u8; 20_000_000];
        assert!(!looks_like_payload(&quiet));
        quiet[19_999_999] = 1;
        assert!(looks_like_payload(&quiet));
    }
}
