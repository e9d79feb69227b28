//! Line sensor classification
//!
//! Turns one frame of calibrated reflectance readings into a line position
//! estimate and a discrete [`LinePattern`].
//!
//! # Position scale
//! Sensor `i` sits at `i * 1000`, so a six-sensor array reports positions in
//! `0..=5000` with 2500 at the center. The estimate is the intensity-weighted
//! centroid of the sensors that read black. When no sensor reads black the
//! previous estimate is held, which keeps the controller steering towards the
//! side the line was last seen on.
//!
//! # Pattern priority
//! The checks run in a fixed order: no black sensor is a gap, a majority of
//! black sensors is a node, and only then are contiguous black runs counted.
//! A fully black frame would otherwise count as one wide line.

use crate::config::SensorConfig;

/// Number of reflectance sensors on the array
pub const SENSOR_COUNT: usize = 6;

/// Calibrated reading of a fully black surface
pub const MAX_RAW: u16 = 1000;

/// Largest position estimate (line under the last sensor)
pub const MAX_POSITION: u16 = (SENSOR_COUNT as u16 - 1) * 1000;

/// One tick worth of calibrated sensor intensities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorFrame {
    values: [u16; SENSOR_COUNT],
}

impl SensorFrame {
    /// Builds a frame, clamping every reading to `MAX_RAW`
    pub fn new(values: [u16; SENSOR_COUNT]) -> Self {
        Self {
            values: values.map(|v| v.min(MAX_RAW)),
        }
    }

    pub fn values(&self) -> &[u16; SENSOR_COUNT] {
        &self.values
    }

    /// Bit `i` set when sensor `i` reads above `threshold`
    pub fn black_mask(&self, threshold: u16) -> u8 {
        self.values
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > threshold)
            .fold(0u8, |mask, (i, _)| mask | (1 << i))
    }
}

/// What the sensor array sees under it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinePattern {
    /// No sensor on the line
    Gap,
    /// A single contiguous line
    Line,
    /// Thick intersection bar, most sensors black
    Node,
    /// Disconnected detections: a fork or sensor noise
    Complex,
}

impl LinePattern {
    /// Compact code used on the telemetry wire
    pub const fn code(self) -> u8 {
        match self {
            Self::Gap => 0,
            Self::Line => 1,
            Self::Node => 2,
            Self::Complex => 3,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Gap),
            1 => Some(Self::Line),
            2 => Some(Self::Node),
            3 => Some(Self::Complex),
            _ => None,
        }
    }
}

/// Classification result for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineReading {
    /// Line position in `0..=MAX_POSITION`, held over gaps
    pub position: u16,
    pub pattern: LinePattern,
    /// Bit `i` set when sensor `i` read black
    pub black_mask: u8,
}

/// Classifies a black mask, see the module docs for the check order
pub fn classify_mask(mask: u8, node_majority: usize) -> LinePattern {
    let black = mask.count_ones() as usize;
    if black == 0 {
        LinePattern::Gap
    } else if black >= node_majority {
        LinePattern::Node
    } else if segment_count(mask) > 1 {
        LinePattern::Complex
    } else {
        LinePattern::Line
    }
}

/// Number of contiguous black runs in a mask
fn segment_count(mask: u8) -> u32 {
    // A run starts at every black bit whose lower neighbour is white.
    (mask & !(mask << 1)).count_ones()
}

/// Stateful classifier holding the last valid position
pub struct LineClassifier {
    config: SensorConfig,
    last_position: u16,
}

impl LineClassifier {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            last_position: MAX_POSITION / 2,
        }
    }

    /// Classifies a frame and updates the held position
    pub fn classify(&mut self, frame: &SensorFrame) -> LineReading {
        let black_mask = frame.black_mask(self.config.black_threshold);
        let pattern = classify_mask(black_mask, self.config.node_majority);

        if let Some(position) = weighted_centroid(frame, black_mask) {
            self.last_position = position;
        }

        LineReading {
            position: self.last_position,
            pattern,
            black_mask,
        }
    }

    /// Last valid position estimate
    pub fn position(&self) -> u16 {
        self.last_position
    }
}

/// Intensity-weighted centroid over the black sensors
fn weighted_centroid(frame: &SensorFrame, black_mask: u8) -> Option<u16> {
    let (weighted, total) = frame
        .values()
        .iter()
        .enumerate()
        .filter(|&(i, _)| black_mask & (1 << i) != 0)
        .fold((0u32, 0u32), |(weighted, total), (i, &v)| {
            (weighted + u32::from(v) * (i as u32 * 1000), total + u32::from(v))
        });

    if total == 0 {
        return None;
    }
    Some((weighted / total) as u16)
}

/// Per-channel raw envelope recorded during the calibration sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorCalibration {
    min: [u16; SENSOR_COUNT],
    max: [u16; SENSOR_COUNT],
}

impl SensorCalibration {
    pub const fn new() -> Self {
        Self {
            min: [u16::MAX; SENSOR_COUNT],
            max: [0; SENSOR_COUNT],
        }
    }

    /// Widens the envelope with one raw sample
    pub fn observe(&mut self, raw: &[u16; SENSOR_COUNT]) {
        for (i, &value) in raw.iter().enumerate() {
            self.min[i] = self.min[i].min(value);
            self.max[i] = self.max[i].max(value);
        }
    }

    /// True once every channel has seen some contrast
    pub fn is_calibrated(&self) -> bool {
        self.min.iter().zip(self.max.iter()).all(|(lo, hi)| hi > lo)
    }

    /// Maps raw samples onto `0..=MAX_RAW`
    ///
    /// Channels without contrast read as white.
    pub fn normalize(&self, raw: &[u16; SENSOR_COUNT]) -> SensorFrame {
        let mut values = [0u16; SENSOR_COUNT];
        for (i, value) in values.iter_mut().enumerate() {
            let (lo, hi) = (self.min[i], self.max[i]);
            if hi <= lo {
                continue;
            }
            let span = u32::from(hi - lo);
            let offset = u32::from(raw[i].clamp(lo, hi) - lo);
            *value = (offset * u32::from(MAX_RAW) / span) as u16;
        }
        SensorFrame::new(values)
    }
}

impl Default for SensorCalibration {
    fn default() -> Self {
        Self::new()
    }
}
