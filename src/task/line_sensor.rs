//! Line sensor acquisition
//!
//! Six analog reflectance sensors (QTR-8A style) share one ADC input through
//! a 74HC4051 mux. Mux channel `i` is sensor `i`, counted from the left.

use crate::system::resources::{Irqs, LineSensorResources};
use defmt::{info, warn};
use embassy_rp::adc::{self, Adc, Async};
use embassy_rp::gpio::{Level, Output, Pull};
use embassy_time::{Duration, Timer};
use line_follower::sensor::{SensorCalibration, SENSOR_COUNT};

/// Time for the mux output to settle after switching channels
const MUX_SETTLE: Duration = Duration::from_micros(20);

/// Samples taken while the array is swept over the line
const CALIBRATION_SAMPLES: u16 = 400;

const CALIBRATION_INTERVAL: Duration = Duration::from_millis(10);

pub struct LineSensor {
    adc: Adc<'static, Async>,
    channel: adc::Channel<'static>,
    select: [Output<'static>; 3],
    // held on for the lifetime of the sensor
    _emitter: Output<'static>,
}

impl LineSensor {
    pub fn new(r: LineSensorResources) -> Self {
        Self {
            adc: Adc::new(r.adc, Irqs, adc::Config::default()),
            channel: adc::Channel::new_pin(r.mux_out, Pull::None),
            select: [
                Output::new(r.select_0, Level::Low),
                Output::new(r.select_1, Level::Low),
                Output::new(r.select_2, Level::Low),
            ],
            _emitter: Output::new(r.emitter, Level::High),
        }
    }

    /// Reads all six sensors, a failed conversion reads as white
    pub async fn read_raw(&mut self) -> [u16; SENSOR_COUNT] {
        let mut raw = [0u16; SENSOR_COUNT];
        for (i, value) in raw.iter_mut().enumerate() {
            for (bit, pin) in self.select.iter_mut().enumerate() {
                pin.set_level(Level::from(i & (1 << bit) != 0));
            }
            Timer::after(MUX_SETTLE).await;

            *value = match self.adc.read(&mut self.channel).await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!("SENSOR: channel {} read failed: {}", i, e);
                    0
                }
            };
        }
        raw
    }

    /// Records the min/max envelope while the array is moved over the line
    pub async fn calibrate(&mut self) -> SensorCalibration {
        info!("SENSOR: calibrating, sweep the array across the line");
        let mut calibration = SensorCalibration::new();
        for i in 0..CALIBRATION_SAMPLES {
            let raw = self.read_raw().await;
            calibration.observe(&raw);
            if i % 100 == 0 {
                info!("SENSOR: calibration {}/{}", i, CALIBRATION_SAMPLES);
            }
            Timer::after(CALIBRATION_INTERVAL).await;
        }

        if calibration.is_calibrated() {
            info!("SENSOR: calibration done");
        } else {
            warn!("SENSOR: some channels saw no contrast, they will read white");
        }
        calibration
    }
}
