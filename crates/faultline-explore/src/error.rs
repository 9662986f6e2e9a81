use faultline_hal::HalError;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    #[error("Timed out waiting for payload data ({received} of {needed} bytes received)")]
    CaptureTimeout { received: usize, needed: usize },

    #[error("Target did not power on: no bus traffic within {polls} polls")]
    PowerOnTimeout { polls: u32 },

    #[error("Sweep cancelled")]
    Cancelled,

    #[error("Payload sink error: {0}")]
    Sink(#[from] std::io::Error),
}
