//! Per-job conversion options.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const QUALITY_RANGE: RangeInclusive<u8> = 1..=100;
pub const SIZE_RANGE: RangeInclusive<u32> = 128..=512;

/// Resolved options, fixed for the lifetime of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub quality: u8,
    /// Edge of the square output canvas.
    pub size: u32,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            quality: 80,
            size: 512,
        }
    }
}

/// Caller-supplied values that take precedence over configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOverrides {
    pub quality: Option<u8>,
    pub size: Option<u32>,
}

impl ConversionOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quality.is_none() && self.size.is_none()
    }
}

impl ConversionOptions {
    /// Merge `overrides` over `defaults` and range-check the result.
    pub fn resolve(overrides: ConversionOverrides, defaults: Self) -> Result<Self> {
        let options = Self {
            quality: overrides.quality.unwrap_or(defaults.quality),
            size: overrides.size.unwrap_or(defaults.size),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !QUALITY_RANGE.contains(&self.quality) {
            return Err(Error::invalid_input(format!(
                "quality must be between {} and {}, got {}",
                QUALITY_RANGE.start(),
                QUALITY_RANGE.end(),
                self.quality
            )));
        }
        if !SIZE_RANGE.contains(&self.size) {
            return Err(Error::invalid_input(format!(
                "size must be between {} and {}, got {}",
                SIZE_RANGE.start(),
                SIZE_RANGE.end(),
                self.size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_defaults() {
        let defaults = ConversionOptions {
            quality: 80,
            size: 512,
        };
        let resolved = ConversionOptions::resolve(
            ConversionOverrides {
                quality: Some(60),
                size: None,
            },
            defaults,
        );
        assert_eq!(
            resolved.ok(),
            Some(ConversionOptions {
                quality: 60,
                size: 512
            })
        );
    }

    #[test]
    fn out_of_range_is_rejected() {
        let defaults = ConversionOptions::default();
        for overrides in [
            ConversionOverrides {
                quality: Some(0),
                size: None,
            },
            ConversionOverrides {
                quality: Some(101),
                size: None,
            },
            ConversionOverrides {
                quality: None,
                size: Some(127),
            },
            ConversionOverrides {
                quality: None,
                size: Some(513),
            },
        ] {
            assert!(
                matches!(
                    ConversionOptions::resolve(overrides, defaults),
                    Err(Error::InvalidInput { .. })
                ),
                "{overrides:?}"
            );
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        let defaults = ConversionOptions::default();
        let low = ConversionOverrides {
            quality: Some(1),
            size: Some(128),
        };
        let high = ConversionOverrides {
            quality: Some(100),
            size: Some(512),
        };
        assert!(ConversionOptions::resolve(low, defaults).is_ok());
        assert!(ConversionOptions::resolve(high, defaults).is_ok());
    }
}
