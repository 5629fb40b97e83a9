use serde::{Deserialize, Serialize};

/// Largest magnitude the node master prints as a number, anything above is `ovf`
pub const PRINTABLE_TEMP_MAX: f32 = 4_294_967_040.0;

/// Locally sampled telemetry of one node.
///
/// Produced in one piece by the receive handler and handed to the main loop
/// through [`crate::Shared`], never field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    pub micros: u32, // capture time, free-running microsecond counter
    pub temp: f32,   // °C
    pub vbat: i16,   // raw
    pub vcc: i16,    // raw
    pub address: u8,
    pub uptime: i32, // seconds
}

impl DataPacket {
    pub const fn new(micros: u32, temp: f32, vbat: i16, vcc: i16, address: u8, uptime: i32) -> Self {
        Self {
            micros,
            temp,
            vbat,
            vcc,
            address,
            uptime,
        }
    }

    /// Whole seconds elapsed between capture and `now_micros`.
    ///
    /// The microsecond counter wraps roughly every 71 minutes, a single wrap
    /// between capture and query still yields the right age.
    pub const fn age_secs(&self, now_micros: u32) -> u32 {
        now_micros.wrapping_sub(self.micros) / 1_000_000
    }

    /// False when the temperature probe delivered nothing usable.
    pub fn probe_ok(&self) -> bool {
        self.temp.is_finite() && (-PRINTABLE_TEMP_MAX..=PRINTABLE_TEMP_MAX).contains(&self.temp)
    }
}
