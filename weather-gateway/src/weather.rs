use chrono::{DateTime, Utc};
use weather_schema::LaCrosse;

/// Dew point in whole °C, `None` for non-positive humidity.
pub fn calculate_dew_point(rel_humidity: f64, temp: f64) -> Option<f64> {
    if rel_humidity <= 0.0 {
        return None;
    }
    let dew_point = (rel_humidity / 100.0).powf(0.125) * (112.0 + 0.9 * temp) + 0.1 * temp - 112.0;
    Some(dew_point.round())
}

/// Humidex rounded to a tenth of a degree.
pub fn calculate_humidex(dew_point: f64, temp: f64) -> f64 {
    let dew_k = dew_point + 273.15;
    let exponent = 5417.7530 * (1.0 / 273.16 - 1.0 / dew_k);
    let humidex = temp + 0.5555 * (6.11 * exponent.exp() - 10.0);
    (humidex * 10.0).round() / 10.0
}

#[derive(Debug, Clone)]
pub struct WeatherReading {
    pub station_id: i16,
    pub temp: f32,
    pub rel_humidity: i16,
    pub wind_speed: f32,
    pub wind_dir: i16,
    pub rainfall: i16,
    pub dew_point_temp: Option<f64>,
    pub humidex: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl WeatherReading {
    pub fn from_raw(raw: LaCrosse, received_at: DateTime<Utc>) -> Self {
        // Temperature and wind speed in tenths
        let temp = f64::from(raw.temp) / 10.0;
        let dew_point_temp = calculate_dew_point(f64::from(raw.humidity), temp);
        let humidex = dew_point_temp.map(|dew_point| calculate_humidex(dew_point, temp));

        Self {
            station_id: raw.station_id,
            temp: raw.temp_celsius(),
            rel_humidity: raw.humidity,
            wind_speed: raw.wind_speed_units(),
            wind_dir: raw.wind_dir,
            rainfall: raw.rainfall,
            dew_point_temp,
            humidex,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dew_point() {
        assert_eq!(calculate_dew_point(50.0, 20.0), Some(9.0));
        assert_eq!(calculate_dew_point(100.0, 25.0), Some(25.0));
        assert_eq!(calculate_dew_point(88.0, -0.7), Some(-2.0));
        assert_eq!(calculate_dew_point(0.0, 20.0), None);
    }

    #[test]
    fn test_humidex() {
        assert_eq!(calculate_humidex(9.0, 20.0), 20.8);
        assert_eq!(calculate_humidex(25.0, 25.0), 37.3);
        assert_eq!(calculate_humidex(-2.0, -0.7), -3.3);
    }

    #[test]
    fn derives_from_raw_frame() {
        let now = Utc::now();
        let reading = WeatherReading::from_raw(LaCrosse::new(71, 183, 4, 20, 16, 9), now);
        assert_eq!(reading.station_id, 9);
        assert_eq!(reading.temp, 18.3);
        assert_eq!(reading.wind_speed, 2.0);
        assert_eq!(reading.dew_point_temp, Some(13.0));
        assert_eq!(reading.humidex, Some(21.1));
        assert_eq!(reading.received_at, now);
    }

    #[test]
    fn dry_frame_has_no_derived_values() {
        let reading = WeatherReading::from_raw(LaCrosse::new(0, 183, 4, 20, 16, 9), Utc::now());
        assert_eq!(reading.dew_point_temp, None);
        assert_eq!(reading.humidex, None);
    }
}
