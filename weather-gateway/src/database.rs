// weather=# \d node_readings
//       Column      |           Type           | Nullable
// ------------------+--------------------------+----------
//  id               | integer                  | not null
//  recorded_at      | timestamp with time zone | not null
//  captured_at      | timestamp with time zone | not null
//  node_address     | smallint                 | not null
//  uptime           | integer                  |
//  temperature      | real                     |
//  vcc              | smallint                 |
//  vbat             | smallint                 |
//  age              | bigint                   |
//  error            | boolean                  | not null
//  error_reason     | text                     |
//
// weather=# \d weather_readings
//       Column           |           Type           | Nullable
// -----------------------+--------------------------+----------
//  id                    | integer                  | not null
//  recorded_at           | timestamp with time zone | not null
//  station_id            | smallint                 | not null
//  temperature           | real                     |
//  relative_humidity     | smallint                 |
//  wind_speed            | real                     |
//  wind_direction        | smallint                 |
//  rainfall              | smallint                 |
//  dew_point_temperature | double precision         |
//  humidex               | double precision         |
//
// weather=# \d pressure_readings
//    Column    |           Type           | Nullable
// -------------+--------------------------+----------
//  id          | integer                  | not null
//  recorded_at | timestamp with time zone | not null
//  pressure    | real                     | not null

use crate::poller::Reading;
use crate::station::{NodeReading, Rejection};
use crate::weather::WeatherReading;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tokio::sync::mpsc::Receiver;

pub async fn insert_node(
    pool: &Pool<Postgres>,
    data: &NodeReading,
    rejection: Option<&Rejection>,
) -> Result<(), anyhow::Error> {
    sqlx::query::<Postgres>(
        r#"
        INSERT INTO node_readings (
            recorded_at,
            captured_at,
            node_address,
            uptime,
            temperature,
            vcc,
            vbat,
            age,
            error,
            error_reason
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(data.received_at)
    .bind(data.captured_at)
    .bind(i16::from(data.address))
    .bind(data.uptime)
    .bind(data.temp)
    .bind(data.vcc)
    .bind(data.vbat)
    .bind(i64::from(data.age))
    .bind(rejection.is_some())
    .bind(rejection.map(|r| r.to_string()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_weather(
    pool: &Pool<Postgres>,
    data: &WeatherReading,
) -> Result<(), anyhow::Error> {
    sqlx::query::<Postgres>(
        r#"
        INSERT INTO weather_readings (
            recorded_at,
            station_id,
            temperature,
            relative_humidity,
            wind_speed,
            wind_direction,
            rainfall,
            dew_point_temperature,
            humidex
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(data.received_at)
    .bind(data.station_id)
    .bind(data.temp)
    .bind(data.rel_humidity)
    .bind(data.wind_speed)
    .bind(data.wind_dir)
    .bind(data.rainfall)
    .bind(data.dew_point_temp)
    .bind(data.humidex)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_pressure(
    pool: &Pool<Postgres>,
    pressure: f32,
    timestamp: DateTime<Utc>,
) -> Result<(), anyhow::Error> {
    sqlx::query::<Postgres>("INSERT INTO pressure_readings (recorded_at, pressure) VALUES ($1, $2)")
        .bind(timestamp)
        .bind(pressure)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drains `receiver` into the database. Without a pool readings are only logged.
pub async fn store(
    pool: Option<Pool<Postgres>>,
    mut receiver: Receiver<Reading>,
) -> Result<(), anyhow::Error> {
    while let Some(reading) = receiver.recv().await {
        tracing::debug!("Data: {reading:?}");
        let Some(pool) = &pool else {
            continue;
        };

        let result = match &reading {
            Reading::Node { reading, rejection } => {
                insert_node(pool, reading, rejection.as_ref()).await
            }
            Reading::Weather(weather) => insert_weather(pool, weather).await,
            Reading::Pressure {
                pressure,
                received_at,
            } => insert_pressure(pool, *pressure, *received_at).await,
        };
        if let Err(e) = result {
            tracing::error!("Failed to insert reading: {e}");
        }
    }
    Ok(())
}
