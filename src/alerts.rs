//! Alert thresholds per sensor type.
//!
//! The evaluator is a single inclusive comparison against a lookup table;
//! new sensor types only add a row to `DEFAULT_THRESHOLDS`.

use anyhow::{anyhow, Result};

use crate::models::SensorType;

// ---

/// Readings at or above these values raise an alert.
pub const DEFAULT_THRESHOLDS: [(SensorType, f64); 5] = [
    (SensorType::Smoke, 75.0),
    (SensorType::Flood, 50.0),
    (SensorType::Seismic, 60.0),
    (SensorType::Heat, 70.0),
    (SensorType::Gas, 40.0),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    thresholds: [f64; SensorType::COUNT],
}

impl Default for ThresholdTable {
    fn default() -> Self {
        // ---
        let mut thresholds = [0.0; SensorType::COUNT];
        for (sensor_type, value) in DEFAULT_THRESHOLDS {
            thresholds[sensor_type as usize] = value;
        }
        Self { thresholds }
    }
}

impl ThresholdTable {
    pub fn threshold(&self, sensor_type: SensorType) -> f64 {
        self.thresholds[sensor_type as usize]
    }

    pub fn with_threshold(mut self, sensor_type: SensorType, value: f64) -> Self {
        self.thresholds[sensor_type as usize] = value;
        self
    }

    /// Apply `type=value` overrides, e.g. `smoke=80,flood=45` or `0=80`.
    pub fn with_overrides(self, spec: &str) -> Result<Self> {
        // ---
        spec.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .try_fold(self, |table, entry| {
                let (name, value) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Threshold override '{}' is not type=value", entry))?;
                let sensor_type = SensorType::from_name(name)
                    .ok_or_else(|| anyhow!("Unknown sensor type '{}' in threshold override", name))?;
                let value: f64 = value
                    .trim()
                    .parse()
                    .map_err(|e| anyhow!("Invalid threshold for {}: {}", name.trim(), e))?;
                if !value.is_finite() {
                    return Err(anyhow!("Threshold for {} must be finite", name.trim()));
                }
                Ok(table.with_threshold(sensor_type, value))
            })
    }

    /// True when `value` reaches the threshold for `sensor_type`.
    pub fn evaluate(&self, sensor_type: SensorType, value: f64) -> bool {
        value >= self.threshold(sensor_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorType, f64)> + '_ {
        SensorType::ALL
            .into_iter()
            .map(move |t| (t, self.threshold(t)))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_smoke_threshold() {
        // ---
        let table = ThresholdTable::default();
        assert_eq!(table.threshold(SensorType::Smoke), 75.0);
        assert!(table.evaluate(SensorType::Smoke, 80.0));
        assert!(!table.evaluate(SensorType::Smoke, 74.9));
    }

    #[test]
    fn test_boundary_triggers_for_every_type() {
        // ---
        let table = ThresholdTable::default();
        for (sensor_type, threshold) in table.iter() {
            assert!(table.evaluate(sensor_type, threshold), "{:?}", sensor_type);
            assert!(
                !table.evaluate(sensor_type, threshold - 0.001),
                "{:?}",
                sensor_type
            );
        }
    }

    #[test]
    fn test_overrides() {
        // ---
        let table = ThresholdTable::default()
            .with_overrides("smoke=80, 1=45.5,")
            .unwrap();
        assert_eq!(table.threshold(SensorType::Smoke), 80.0);
        assert_eq!(table.threshold(SensorType::Flood), 45.5);
        // Untouched entries keep their defaults
        assert_eq!(table.threshold(SensorType::Gas), 40.0);
    }

    #[test]
    fn test_bad_overrides() {
        // ---
        let table = ThresholdTable::default();
        assert!(table.clone().with_overrides("smoke").is_err());
        assert!(table.clone().with_overrides("lava=10").is_err());
        assert!(table.clone().with_overrides("smoke=abc").is_err());
        assert!(table.with_overrides("smoke=inf").is_err());
    }
}
