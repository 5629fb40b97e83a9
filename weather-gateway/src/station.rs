use crate::config::NodeConfig;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use weather_schema::protocol::NodeReport;

/// Consecutive variance rejections after which a node's baseline is
/// reported as possibly stuck, and again at every multiple.
const STUCK_BASELINE_STREAK: u32 = 5;

#[derive(Debug, Clone)]
pub struct Limits {
    pub temp: RangeInclusive<f32>,
    pub voltage: RangeInclusive<i16>,
    /// Oldest acceptable packet, seconds
    pub max_age: u32,
    /// Allowed relative change against the last accepted reading
    pub variance: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            temp: -50.0..=50.0,
            voltage: 0..=1000,
            max_age: 700,
            variance: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    UnknownNode(u8),
    AddressMismatch { expected: u8, found: u8 },
    ProbeFault,
    TempOutOfRange(f32),
    VoltageOutOfRange { vcc: i16, vbat: i16 },
    Stale(u32),
    Variance {
        field: &'static str,
        previous: f32,
        current: f32,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode(address) => write!(f, "unknown node {address}"),
            Self::AddressMismatch { expected, found } => {
                write!(f, "asked node {expected}, node {found} answered")
            }
            Self::ProbeFault => f.write_str("temperature probe fault"),
            Self::TempOutOfRange(temp) => write!(f, "temperature {temp} out of range"),
            Self::VoltageOutOfRange { vcc, vbat } => {
                write!(f, "voltage out of range (vcc {vcc}, vbat {vbat})")
            }
            Self::Stale(age) => write!(f, "reading is {age} s old"),
            Self::Variance {
                field,
                previous,
                current,
            } => write!(f, "{field} jumped from {previous} to {current}"),
        }
    }
}

/// Node report with battery scaling applied and timestamps attached.
#[derive(Debug, Clone)]
pub struct NodeReading {
    pub address: u8,
    pub uptime: i32,
    pub temp: Option<f32>,
    pub vcc: i16,
    pub vbat: i16,
    pub age: u32,
    pub captured_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl NodeReading {
    pub fn from_report(report: NodeReport, node: &NodeConfig, received_at: DateTime<Utc>) -> Self {
        let captured_at = received_at - TimeDelta::seconds(i64::from(report.age));
        Self {
            address: report.address,
            uptime: report.uptime,
            temp: report.temp,
            vcc: report.vcc,
            vbat: report.vbat / node.vbat_divisor,
            age: report.age,
            captured_at,
            received_at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    temp: f32,
    vcc: i16,
    vbat: i16,
}

/// Plausibility checks against fixed limits and the last accepted reading
/// of each node.
pub struct Validator {
    limits: Limits,
    baselines: HashMap<u8, Option<Baseline>>,
    variance_streaks: HashMap<u8, u32>,
}

impl Validator {
    pub fn new(limits: Limits, nodes: &[NodeConfig]) -> Self {
        Self {
            limits,
            baselines: nodes.iter().map(|node| (node.address, None)).collect(),
            variance_streaks: HashMap::new(),
        }
    }

    /// Checks `reading`; an accepted reading becomes the node's new baseline.
    pub fn check(&mut self, reading: &NodeReading) -> Result<(), Rejection> {
        let limits = &self.limits;
        let temp = reading.temp.ok_or(Rejection::ProbeFault)?;

        tracing::debug!(
            "Checking min/maxes (temp/vcc/vbat/age): {temp}/{}/{}/{}",
            reading.vcc,
            reading.vbat,
            reading.age
        );
        if !limits.temp.contains(&temp) {
            return Err(Rejection::TempOutOfRange(temp));
        }
        if !limits.voltage.contains(&reading.vcc) || !limits.voltage.contains(&reading.vbat) {
            return Err(Rejection::VoltageOutOfRange {
                vcc: reading.vcc,
                vbat: reading.vbat,
            });
        }
        if reading.age > limits.max_age {
            return Err(Rejection::Stale(reading.age));
        }

        let baseline = self
            .baselines
            .get_mut(&reading.address)
            .ok_or(Rejection::UnknownNode(reading.address))?;

        if let Some(previous) = baseline {
            let checks = [
                ("temp", previous.temp, temp),
                ("vbat", f32::from(previous.vbat), f32::from(reading.vbat)),
                ("vcc", f32::from(previous.vcc), f32::from(reading.vcc)),
            ];
            for (field, previous, current) in checks {
                if !within_variance(previous, current, limits.variance) {
                    let streak = self.variance_streaks.entry(reading.address).or_insert(0);
                    *streak = streak.saturating_add(1);
                    if *streak % STUCK_BASELINE_STREAK == 0 {
                        tracing::warn!(
                            "Node {} rejected for variance {} times in a row, baseline {field} {previous} may be stuck",
                            reading.address,
                            *streak
                        );
                    }
                    return Err(Rejection::Variance {
                        field,
                        previous,
                        current,
                    });
                }
            }
        } else {
            tracing::debug!("First reading of node {}, accepting", reading.address);
        }

        *baseline = Some(Baseline {
            temp,
            vcc: reading.vcc,
            vbat: reading.vbat,
        });
        self.variance_streaks.remove(&reading.address);
        Ok(())
    }

    /// Variance rejections of `address` since its last accepted reading.
    pub fn variance_streak(&self, address: u8) -> u32 {
        self.variance_streaks.get(&address).copied().unwrap_or(0)
    }
}

fn within_variance(previous: f32, current: f32, variance: f32) -> bool {
    let a = previous * (1.0 - variance);
    let b = previous * (1.0 + variance);
    (a.min(b)..=a.max(b)).contains(&current)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODES: [NodeConfig; 2] = [
        NodeConfig {
            address: 1,
            vbat_divisor: 1,
        },
        NodeConfig {
            address: 2,
            vbat_divisor: 2,
        },
    ];

    fn reading(address: u8, temp: Option<f32>, vcc: i16, vbat: i16, age: u32) -> NodeReading {
        let report = NodeReport {
            address,
            uptime: 100,
            temp,
            vcc,
            vbat,
            age,
        };
        NodeReading::from_report(report, &NODES[0], Utc::now())
    }

    #[test]
    fn battery_divisor_and_capture_time() {
        let now = Utc::now();
        let report = NodeReport {
            address: 2,
            uptime: 10,
            temp: Some(20.0),
            vcc: 330,
            vbat: 740,
            age: 30,
        };
        let reading = NodeReading::from_report(report, &NODES[1], now);
        assert_eq!(reading.vbat, 370);
        assert_eq!(reading.vcc, 330);
        assert_eq!(reading.captured_at, now - TimeDelta::seconds(30));
    }

    #[test]
    fn range_checks() {
        let mut validator = Validator::new(Limits::default(), &NODES);
        assert_eq!(
            validator.check(&reading(1, None, 330, 370, 1)),
            Err(Rejection::ProbeFault)
        );
        assert_eq!(
            validator.check(&reading(1, Some(51.0), 330, 370, 1)),
            Err(Rejection::TempOutOfRange(51.0))
        );
        assert_eq!(
            validator.check(&reading(1, Some(20.0), 1001, 370, 1)),
            Err(Rejection::VoltageOutOfRange { vcc: 1001, vbat: 370 })
        );
        assert_eq!(
            validator.check(&reading(1, Some(20.0), 330, -1, 1)),
            Err(Rejection::VoltageOutOfRange { vcc: 330, vbat: -1 })
        );
        assert_eq!(
            validator.check(&reading(1, Some(20.0), 330, 370, 701)),
            Err(Rejection::Stale(701))
        );
        assert_eq!(
            validator.check(&reading(9, Some(20.0), 330, 370, 1)),
            Err(Rejection::UnknownNode(9))
        );
    }

    #[test]
    fn first_reading_sets_baseline() {
        let mut validator = Validator::new(Limits::default(), &NODES);
        assert_eq!(validator.check(&reading(1, Some(20.0), 330, 370, 1)), Ok(()));
        assert_eq!(validator.check(&reading(1, Some(25.0), 330, 370, 1)), Ok(()));
        assert_eq!(
            validator.check(&reading(1, Some(33.0), 330, 370, 1)),
            Err(Rejection::Variance {
                field: "temp",
                previous: 25.0,
                current: 33.0,
            })
        );
        // Baselines are per node
        assert_eq!(validator.check(&reading(2, Some(40.0), 500, 500, 1)), Ok(()));
    }

    #[test]
    fn rejected_reading_keeps_old_baseline() {
        let mut validator = Validator::new(Limits::default(), &NODES);
        validator.check(&reading(1, Some(20.0), 330, 370, 1)).unwrap();
        assert!(validator.check(&reading(1, Some(20.0), 330, 200, 1)).is_err());
        assert_eq!(validator.check(&reading(1, Some(21.0), 340, 360, 1)), Ok(()));
    }

    #[test]
    fn variance_streak_counts_until_accepted() {
        let mut validator = Validator::new(Limits::default(), &NODES);
        validator.check(&reading(1, Some(0.0), 330, 370, 1)).unwrap();
        for expected in 1..=STUCK_BASELINE_STREAK * 2 {
            assert!(matches!(
                validator.check(&reading(1, Some(0.5), 330, 370, 1)),
                Err(Rejection::Variance { field: "temp", .. })
            ));
            assert_eq!(validator.variance_streak(1), expected);
        }
        // Range failures are not variance failures
        assert!(validator.check(&reading(1, None, 330, 370, 1)).is_err());
        assert_eq!(validator.variance_streak(1), STUCK_BASELINE_STREAK * 2);
        assert_eq!(validator.variance_streak(2), 0);

        assert_eq!(validator.check(&reading(1, Some(0.0), 330, 370, 1)), Ok(()));
        assert_eq!(validator.variance_streak(1), 0);
    }

    #[test]
    fn variance_with_negative_baseline() {
        assert!(within_variance(-10.0, -12.0, 0.3));
        assert!(within_variance(-10.0, -7.5, 0.3));
        assert!(!within_variance(-10.0, -14.0, 0.3));
        assert!(!within_variance(-10.0, 5.0, 0.3));
        assert!(within_variance(0.0, 0.0, 0.3));
        assert!(!within_variance(0.0, 0.1, 0.3));
    }
}
