//! Inclusive sweep ranges and the 2-D (offset, width) grid built from them.
//!
//! Grid iteration is row-major: offsets ascend in the outer loop, widths in
//! the inner one. Every point is yielded exactly once.

use serde::{Deserialize, Serialize};

use crate::types::GlitchParameter;

/// One swept axis: `min..=max` in increments of `step`.
///
/// `max` is included only when reachable from `min` by whole steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRange {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

impl SweepRange {
    pub const fn new(min: u32, max: u32, step: u32) -> Self {
        Self { min, max, step }
    }

    /// A range holding exactly one value.
    pub const fn fixed(value: u32) -> Self {
        Self {
            min: value,
            max: value,
            step: 1,
        }
    }

    /// Reasons this range cannot be swept, if any.
    pub fn check(&self) -> Result<(), String> {
        if self.step == 0 {
            return Err(format!("step must be non-zero (range {}..={})", self.min, self.max));
        }
        if self.min > self.max {
            return Err(format!("min {} exceeds max {}", self.min, self.max));
        }
        Ok(())
    }

    /// Number of values visited. Zero for an empty range; a zero step
    /// degenerates to the single value `min`.
    pub fn len(&self) -> u64 {
        if self.min > self.max {
            return 0;
        }
        match self.step {
            0 => 1,
            step => u64::from(self.max - self.min) / u64::from(step) + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> RangeValues {
        RangeValues {
            next: (self.min <= self.max).then_some(self.min),
            max: self.max,
            step: self.step,
        }
    }
}

/// Iterator over the values of a [`SweepRange`].
#[derive(Debug, Clone)]
pub struct RangeValues {
    next: Option<u32>,
    max: u32,
    step: u32,
}

impl Iterator for RangeValues {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.next?;
        self.next = match self.step {
            0 => None,
            step => current.checked_add(step).filter(|v| *v <= self.max),
        };
        Some(current)
    }
}

/// A 2-D sweep over glitch offset and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub offset: SweepRange,
    pub width: SweepRange,
}

impl SweepGrid {
    pub const fn new(offset: SweepRange, width: SweepRange) -> Self {
        Self { offset, width }
    }

    /// Total number of points in the grid. Saturates at `u64::MAX` for two
    /// full-width axes.
    pub fn len(&self) -> u64 {
        self.offset.len().saturating_mul(self.width.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check(&self) -> Result<(), String> {
        self.offset.check().map_err(|e| format!("offset: {e}"))?;
        self.width.check().map_err(|e| format!("width: {e}"))
    }

    /// Row-major iteration: offset outer, width inner.
    pub fn points(&self) -> impl Iterator<Item = GlitchParameter> + '_ {
        self.offset.values().flat_map(move |offset| {
            self.width
                .values()
                .map(move |width| GlitchParameter::new(offset, width))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_includes_reachable_max() {
        let values: Vec<u32> = SweepRange::new(1, 7, 3).values().collect();
        assert_eq!(values, vec![1, 4, 7]);
    }

    #[test]
    fn test_range_skips_unreachable_max() {
        let values: Vec<u32> = SweepRange::new(1, 8, 3).values().collect();
        assert_eq!(values, vec![1, 4, 7]);
        assert_eq!(SweepRange::new(1, 8, 3).len(), 3);
    }

    #[test]
    fn test_range_near_u32_max_does_not_overflow() {
        let values: Vec<u32> = SweepRange::new(u32::MAX - 2, u32::MAX, 2).values().collect();
        assert_eq!(values, vec![u32::MAX - 2, u32::MAX]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let range = SweepRange::new(10, 5, 1);
        assert!(range.is_empty());
        assert_eq!(range.values().count(), 0);
        assert!(range.check().is_err());
    }

    #[test]
    fn test_zero_step_rejected_but_finite() {
        let range = SweepRange::new(3, 9, 0);
        assert!(range.check().is_err());
        assert_eq!(range.values().collect::<Vec<_>>(), vec![3]);
    }
}
