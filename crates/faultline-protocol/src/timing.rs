/// Width of the capture sequence counter.
pub const COUNTER_MODULUS: u32 = 0x1_0000;

/// Ticks between two 16-bit counter samples, accounting for a single wrap.
pub fn elapsed_ticks(previous: u16, current: u16) -> u32 {
    if current < previous {
        u32::from(current) + COUNTER_MODULUS - u32::from(previous)
    } else {
        u32::from(current - previous)
    }
}

/// Convert counter ticks to milliseconds. Each tick is `prescale` cycles of
/// the capture clock running at `sysclk_hz`.
pub fn ticks_to_millis(ticks: u32, prescale: u32, sysclk_hz: u64) -> f64 {
    if sysclk_hz == 0 {
        return 0.0;
    }
    (f64::from(ticks) * f64::from(prescale) * 1000.0) / sysclk_hz as f64
}
