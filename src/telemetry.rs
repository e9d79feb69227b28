//! Telemetry record
//!
//! One compact JSON object per report, `{"s":1,"v":1,"d":12.3}`:
//! - `s`: navigation state code ([`NavState::code`])
//! - `v`: line pattern code ([`LinePattern::code`])
//! - `d`: distance ahead in centimeters, one decimal place
//!
//! Records are host-bound and best effort; nothing is acknowledged.

use core::fmt;

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::navigator::NavState;
use crate::sensor::LinePattern;

/// Upper bound of an encoded record
pub const MAX_RECORD_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    pub s: u8,
    pub v: u8,
    pub d: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryError {
    /// The record does not fit the output buffer
    Overflow,
    /// The input is not a telemetry record
    Malformed,
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => f.write_str("telemetry record too long"),
            Self::Malformed => f.write_str("malformed telemetry record"),
        }
    }
}

impl Telemetry {
    pub fn new(state: NavState, pattern: LinePattern, distance_cm: f32) -> Self {
        Self {
            s: state.code(),
            v: pattern.code(),
            d: libm::roundf(distance_cm * 10.0) / 10.0,
        }
    }

    pub fn encode(&self) -> Result<String<MAX_RECORD_LEN>, TelemetryError> {
        let mut buf = [0u8; MAX_RECORD_LEN];
        let len =
            serde_json_core::to_slice(self, &mut buf).map_err(|_| TelemetryError::Overflow)?;
        let text = core::str::from_utf8(&buf[..len]).map_err(|_| TelemetryError::Malformed)?;

        let mut out = String::new();
        out.push_str(text).map_err(|_| TelemetryError::Overflow)?;
        Ok(out)
    }

    pub fn decode(text: &str) -> Result<Self, TelemetryError> {
        serde_json_core::from_str::<Self>(text)
            .map(|(record, _)| record)
            .map_err(|_| TelemetryError::Malformed)
    }

    pub fn pattern(&self) -> Option<LinePattern> {
        LinePattern::from_code(self.v)
    }
}
