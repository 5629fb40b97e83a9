use serde::{Deserialize, Serialize};

/// One decoded frame of a LaCrosse remote weather station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaCrosse {
    pub humidity: i16,   // % RH
    pub temp: i16,       // 0.1 °C
    pub wind_dir: i16,   // direction code
    pub wind_speed: i16, // 0.1 units
    pub rainfall: i16,   // bucket counter
    pub station_id: i16,
}

impl LaCrosse {
    pub const fn new(
        humidity: i16,
        temp: i16,
        wind_dir: i16,
        wind_speed: i16,
        rainfall: i16,
        station_id: i16,
    ) -> Self {
        Self {
            humidity,
            temp,
            wind_dir,
            wind_speed,
            rainfall,
            station_id,
        }
    }

    pub fn temp_celsius(&self) -> f32 {
        self.temp as f32 / 10.0
    }

    pub fn wind_speed_units(&self) -> f32 {
        self.wind_speed as f32 / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::LaCrosse;

    #[test]
    fn tenths_are_scaled() {
        let reading = LaCrosse::new(55, -35, 8, 42, 120, 3);
        assert_eq!(reading.temp_celsius(), -3.5);
        assert_eq!(reading.wind_speed_units(), 4.2);
    }

    #[test]
    fn fields_are_independent() {
        let mut reading = LaCrosse::new(55, 215, 8, 42, 120, 3);
        reading.wind_dir = 12;
        reading.rainfall = 121;
        assert_eq!(
            reading,
            LaCrosse {
                humidity: 55,
                temp: 215,
                wind_dir: 12,
                wind_speed: 42,
                rainfall: 121,
                station_id: 3,
            }
        );
    }
}
