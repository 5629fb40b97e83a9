use crate::config::{GatewayConfig, NodeConfig};
use crate::link::{LinkError, MasterLink, PressureLink, SETTLE, SerialTransport, Transport};
use crate::station::{Limits, NodeReading, Rejection, Validator};
use crate::weather::WeatherReading;
use chrono::{DateTime, Utc};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub enum Reading {
    Node {
        reading: NodeReading,
        rejection: Option<Rejection>,
    },
    Weather(WeatherReading),
    Pressure {
        pressure: f32,
        received_at: DateTime<Utc>,
    },
}

/// Configured nodes and their validation state. Outlives reconnects.
pub struct Station {
    nodes: Vec<NodeConfig>,
    validator: Validator,
}

impl Station {
    pub fn new(nodes: Vec<NodeConfig>, limits: Limits) -> Self {
        let validator = Validator::new(limits, &nodes);
        Self { nodes, validator }
    }

    fn node_reading(&mut self, node: &NodeConfig, reading: NodeReading) -> Reading {
        let rejection = if reading.address != node.address {
            Some(Rejection::AddressMismatch {
                expected: node.address,
                found: reading.address,
            })
        } else {
            self.validator.check(&reading).err()
        };
        match &rejection {
            Some(rejection) => {
                tracing::error!("Node {} out of range - data old or invalid: {rejection}", node.address);
                tracing::error!("Value: {reading:?}");
            }
            None => tracing::info!("Node {} received: {reading:?}", node.address),
        }
        Reading::Node { reading, rejection }
    }
}

pub struct Links<T, P> {
    pub master: MasterLink<T>,
    pub pressure: Option<PressureLink<P>>,
}

pub type SerialLinks = Links<SerialTransport, SerialTransport>;

impl SerialLinks {
    pub fn open(config: &GatewayConfig) -> Result<Self, anyhow::Error> {
        let mut master = MasterLink::new(
            SerialTransport::open(&config.master)?,
            SETTLE,
            config.max_retries,
        );
        // Freshly opened ports start with garbage
        master.resync()?;
        let pressure = match &config.pressure {
            Some(pressure) => Some(PressureLink::new(SerialTransport::open(pressure)?, SETTLE)),
            None => None,
        };
        Ok(Self { master, pressure })
    }
}

/// One pass over every node, the LaCrosse station and the barometer.
/// Device level failures are logged and skipped, I/O failures end the pass.
pub fn poll_cycle<T: Transport, P: Transport>(
    links: &mut Links<T, P>,
    station: &mut Station,
    pause: Duration,
) -> Result<Vec<Reading>, LinkError> {
    tracing::debug!("Updating all nodes");
    let mut readings = Vec::new();

    for node in station.nodes.clone() {
        match links.master.node(node.address) {
            Ok(report) => {
                let reading = NodeReading::from_report(report, &node, Utc::now());
                readings.push(station.node_reading(&node, reading));
            }
            Err(LinkError::Io(e)) => return Err(LinkError::Io(e)),
            Err(e) => tracing::error!("Node {}: {e}", node.address),
        }
        thread::sleep(pause);
    }

    match links.master.lacrosse() {
        Ok(raw) => {
            let reading = WeatherReading::from_raw(raw, Utc::now());
            tracing::info!("LaCrosse received: {reading:?}");
            readings.push(Reading::Weather(reading));
        }
        Err(LinkError::Io(e)) => return Err(LinkError::Io(e)),
        Err(e) => tracing::error!("LaCrosse: {e}"),
    }

    if let Some(pressure_link) = links.pressure.as_mut() {
        match pressure_link.read() {
            Ok(pressure) => {
                tracing::info!("Pressure received: {pressure}");
                readings.push(Reading::Pressure {
                    pressure,
                    received_at: Utc::now(),
                });
            }
            Err(LinkError::Io(e)) => return Err(LinkError::Io(e)),
            Err(e) => tracing::error!("Pressure: {e}"),
        }
    }

    Ok(readings)
}

/// Polls forever on a blocking thread and hands readings to `sender`.
/// Serial ports are reopened with backoff whenever they fail.
pub async fn run(config: GatewayConfig, sender: Sender<Reading>) -> Result<(), anyhow::Error> {
    let mut station = Station::new(config.nodes.clone(), Limits::default());
    let mut backoff_ms = BASE_BACKOFF_MS;
    let mut announced = false;

    loop {
        let open_config = config.clone();
        let opened = tokio::task::spawn_blocking(move || SerialLinks::open(&open_config)).await?;
        let mut links = match opened {
            Ok(links) => {
                tracing::info!("Connected to node master on {}", config.master.port);
                backoff_ms = BASE_BACKOFF_MS;
                links
            }
            Err(e) => {
                tracing::warn!("Open error: {e}; backoff {backoff_ms}ms");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_SECS * 1000);
                continue;
            }
        };

        if !announced {
            let (returned, current) = tokio::task::spawn_blocking(move || {
                let current = links.master.current();
                (links, current)
            })
            .await?;
            links = returned;
            match current {
                Ok(lines) => lines
                    .iter()
                    .for_each(|line| tracing::info!("Current: {line}")),
                Err(e) => tracing::warn!("Failed to read current state: {e}"),
            }
            announced = true;
        }

        let mut interval = tokio::time::interval(config.poll_interval);
        loop {
            interval.tick().await;
            let (returned_links, returned_station, result) =
                tokio::task::spawn_blocking(move || {
                    let result = poll_cycle(&mut links, &mut station, SETTLE);
                    (links, station, result)
                })
                .await?;
            links = returned_links;
            station = returned_station;

            match result {
                Ok(readings) => {
                    for reading in readings {
                        sender.send(reading).await?;
                    }
                }
                Err(e) => {
                    tracing::error!("Poll failed: {e}; reconnecting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::testing::ScriptedTransport;

    fn links(
        master: &[Option<&str>],
        pressure: Option<&[Option<&str>]>,
    ) -> Links<ScriptedTransport, ScriptedTransport> {
        Links {
            master: MasterLink::new(ScriptedTransport::new(master), Duration::ZERO, 0),
            pressure: pressure
                .map(|replies| PressureLink::new(ScriptedTransport::new(replies), Duration::ZERO)),
        }
    }

    fn station() -> Station {
        Station::new(
            vec![
                NodeConfig {
                    address: 1,
                    vbat_divisor: 1,
                },
                NodeConfig {
                    address: 2,
                    vbat_divisor: 2,
                },
            ],
            Limits::default(),
        )
    }

    #[test]
    fn full_cycle() {
        let mut links = links(
            &[
                Some(""),
                Some("1,3600,20.50,330,370,5"),
                Some(""),
                Some("2,3600,ovf,330,740,5"),
                Some(""),
                Some("9,183,71,20,4,16"),
            ],
            Some(&[Some("pres"), Some("1009.5")]),
        );
        let mut station = station();
        let readings = poll_cycle(&mut links, &mut station, Duration::ZERO).unwrap();
        assert_eq!(readings.len(), 4);

        match &readings[0] {
            Reading::Node { reading, rejection } => {
                assert_eq!(reading.address, 1);
                assert_eq!(reading.temp, Some(20.5));
                assert_eq!(rejection, &None);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &readings[1] {
            Reading::Node { reading, rejection } => {
                assert_eq!(reading.vbat, 370);
                assert_eq!(rejection, &Some(Rejection::ProbeFault));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &readings[2] {
            Reading::Weather(weather) => assert_eq!(weather.station_id, 9),
            other => panic!("unexpected {other:?}"),
        }
        match &readings[3] {
            Reading::Pressure { pressure, .. } => assert_eq!(*pressure, 1009.5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn skips_silent_devices() {
        let mut links = links(
            &[Some(""), Some(""), Some(""), Some("1,3600,20.50,330,370,5")],
            None,
        );
        let mut station = station();
        let readings = poll_cycle(&mut links, &mut station, Duration::ZERO).unwrap();
        // Node 1 had nothing, node 2 answered with node 1's packet, LaCrosse timed out
        assert_eq!(readings.len(), 1);
        match &readings[0] {
            Reading::Node { rejection, .. } => assert_eq!(
                rejection,
                &Some(Rejection::AddressMismatch {
                    expected: 2,
                    found: 1
                })
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn io_failure_ends_cycle() {
        let mut links = links(&[], None);
        links.master = MasterLink::new(
            ScriptedTransport {
                broken: true,
                ..Default::default()
            },
            Duration::ZERO,
            0,
        );
        let mut station = station();
        assert!(matches!(
            poll_cycle(&mut links, &mut station, Duration::ZERO),
            Err(LinkError::Io(_))
        ));
    }
}
