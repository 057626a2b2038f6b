//! Station traffic simulator
//!
//! Publishes random readings for a set of stations on the inbound sensor
//! topics, one reading per station and sensor kind every interval.

use bytes::Bytes;
use rand::Rng;
use smogwatch_core::{Result, SensorKind, SensorReading};
use std::ops::Range;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::transport::{Qos, Transport};

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub stations: Vec<String>,
    pub interval: Duration,
    pub rounds: u32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            stations: (1..=6).map(|n| format!("A{}", n)).collect(),
            interval: Duration::from_secs(2),
            rounds: 50,
        }
    }
}

/// Range readings of a kind are drawn from
pub fn value_range(kind: SensorKind) -> Range<f64> {
    match kind {
        SensorKind::Pm10 | SensorKind::Pm25 => 0.0..200.0,
        SensorKind::Humidity => 90.0..100.0,
    }
}

/// One round of readings: every station, every sensor kind
pub fn random_round(
    rng: &mut impl Rng,
    stations: &[String],
    timestamp: i64,
) -> Vec<(SensorKind, SensorReading)> {
    stations
        .iter()
        .flat_map(|station| SensorKind::ALL.into_iter().map(move |kind| (kind, station)))
        .map(|(kind, station)| {
            let value = rng.gen_range(value_range(kind));
            (kind, SensorReading::new(timestamp, station.clone(), value))
        })
        .collect()
}

fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Publish `settings.rounds` rounds of readings
pub async fn run(transport: &dyn Transport, settings: &SimulationSettings) -> Result<()> {
    info!(
        stations = settings.stations.len(),
        rounds = settings.rounds,
        interval_ms = settings.interval.as_millis() as u64,
        "Simulation started"
    );

    for round in 1..=settings.rounds {
        let readings = random_round(&mut rand::thread_rng(), &settings.stations, epoch_seconds());

        for (kind, reading) in readings {
            let payload = Bytes::from(serde_json::to_vec(&reading)?);
            transport
                .publish(kind.inbound_topic(), payload, Qos::AtMostOnce)
                .await?;
        }

        info!(round, "Published readings");
        if round < settings.rounds {
            tokio::time::sleep(settings.interval).await;
        }
    }

    info!("Simulation finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_round_covers_every_station_and_kind() {
        let settings = SimulationSettings::default();
        let mut rng = StdRng::seed_from_u64(7);

        let round = random_round(&mut rng, &settings.stations, 1_700_000_000);
        assert_eq!(round.len(), 18);

        for (kind, reading) in &round {
            assert!(value_range(*kind).contains(&reading.value));
            assert_eq!(reading.timestamp, 1_700_000_000);
        }
        assert_eq!(
            round.iter().filter(|(kind, _)| *kind == SensorKind::Humidity).count(),
            6
        );
        assert!(round.iter().any(|(_, r)| r.station == "A6"));
    }
}
