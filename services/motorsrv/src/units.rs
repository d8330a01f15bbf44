//! Raw register <-> physical unit conversion
//!
//! All functions are total: out-of-range inputs are clamped or extrapolated,
//! never rejected.

use serde::{Deserialize, Serialize};

use crate::poller::TelemetrySample;

/// Scaling constants for the rig's drive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// raw RPM register / rpm_divisor = rpm
    pub rpm_divisor: f64,
    /// raw torque register / torque_divisor = torque
    pub torque_divisor: f64,
    /// RPM anchor that maps to `min_pct`
    pub min_rpm: f64,
    /// RPM anchor that maps to 100 %
    pub max_rpm: f64,
    pub min_pct: f64,
    /// Command percent range mapped onto `register_start..=register_end`
    pub range_start: f64,
    pub range_end: f64,
    pub register_start: f64,
    pub register_end: f64,
    /// Lowest percent a command may request
    pub min_percent: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            rpm_divisor: 3.34,
            torque_divisor: 1.3,
            min_rpm: 400.0,
            max_rpm: 1350.0,
            min_pct: 5.0,
            range_start: 4.0,
            range_end: 100.0,
            register_start: 3510.0,
            register_end: 12150.0,
            min_percent: 4.0,
        }
    }
}

impl ScalingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.rpm_divisor.is_nan() || self.rpm_divisor <= 0.0 {
            errors.push("scaling.rpm_divisor must be positive".to_string());
        }
        if self.torque_divisor.is_nan() || self.torque_divisor <= 0.0 {
            errors.push("scaling.torque_divisor must be positive".to_string());
        }
        if self.max_rpm.is_nan() || self.max_rpm <= self.min_rpm {
            errors.push("scaling.max_rpm must be greater than scaling.min_rpm".to_string());
        }
        if self.range_end.is_nan() || self.range_end <= self.range_start {
            errors.push("scaling.range_end must be greater than scaling.range_start".to_string());
        }
        if !(self.range_start..=self.range_end).contains(&self.min_percent) {
            errors.push(format!(
                "scaling.min_percent {} outside [{}, {}]",
                self.min_percent, self.range_start, self.range_end
            ));
        }
        if !(0.0..=f64::from(u16::MAX)).contains(&self.register_start)
            || !(0.0..=f64::from(u16::MAX)).contains(&self.register_end)
        {
            errors.push("scaling register bounds must fit in a 16-bit register".to_string());
        }
        errors
    }
}

/// Stateless converter over one [`ScalingConfig`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitConverter {
    scaling: ScalingConfig,
}

impl UnitConverter {
    pub fn new(scaling: ScalingConfig) -> Self {
        Self { scaling }
    }

    pub fn scaling(&self) -> &ScalingConfig {
        &self.scaling
    }

    pub fn rpm_from_raw(&self, raw: u16) -> i64 {
        (f64::from(raw) / self.scaling.rpm_divisor).round() as i64
    }

    pub fn torque_from_raw(&self, raw: u16) -> i64 {
        (f64::from(raw) / self.scaling.torque_divisor).round() as i64
    }

    /// Line through (min_rpm, min_pct) and (max_rpm, 100), clamped to [0, 100]
    pub fn percent_from_rpm(&self, rpm: i64) -> f64 {
        let s = &self.scaling;
        let pct =
            s.min_pct + (rpm as f64 - s.min_rpm) * (100.0 - s.min_pct) / (s.max_rpm - s.min_rpm);
        pct.clamp(0.0, 100.0)
    }

    /// Clamp a requested command to [min_percent, range_end]
    pub fn clamp_command(&self, pct: f64) -> f64 {
        pct.clamp(self.scaling.min_percent, self.scaling.range_end)
    }

    /// Line from [range_start, range_end] onto [register_start, register_end].
    ///
    /// Callers clamp `pct` first; the result is still bounded to a u16.
    pub fn register_from_percent(&self, pct: f64) -> u16 {
        let s = &self.scaling;
        let value = s.register_start
            + (pct - s.range_start) * (s.register_end - s.register_start)
                / (s.range_end - s.range_start);
        value.round().clamp(0.0, f64::from(u16::MAX)) as u16
    }

    pub fn sample(&self, raw_rpm: u16, raw_torque: u16) -> TelemetrySample {
        let rpm = self.rpm_from_raw(raw_rpm);
        TelemetrySample {
            rpm,
            torque: self.torque_from_raw(raw_torque),
            percent: self.percent_from_rpm(rpm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_rpm_and_torque_rounding() {
        let c = UnitConverter::default();
        assert_eq!(c.rpm_from_raw(1350), 404);
        assert_eq!(c.rpm_from_raw(0), 0);
        assert_eq!(c.rpm_from_raw(4509), 1350);
        assert_eq!(c.torque_from_raw(650), 500);
        assert_eq!(c.torque_from_raw(1), 1);
        assert_eq!(c.torque_from_raw(u16::MAX), 50412);
    }

    #[test]
    fn test_percent_anchors() {
        let c = UnitConverter::default();
        assert!(close(c.percent_from_rpm(400), 5.0));
        assert!(close(c.percent_from_rpm(1350), 100.0));
        assert!(close(c.percent_from_rpm(404), 5.4));
    }

    #[test]
    fn test_percent_clamped() {
        let c = UnitConverter::default();
        assert_eq!(c.percent_from_rpm(0), 0.0);
        assert_eq!(c.percent_from_rpm(-1000), 0.0);
        assert_eq!(c.percent_from_rpm(5000), 100.0);
        // Extrapolated below the low anchor until it hits zero
        assert!(close(c.percent_from_rpm(360), 1.0));
    }

    #[test]
    fn test_percent_monotonic() {
        let c = UnitConverter::default();
        let mut last = c.percent_from_rpm(400);
        for rpm in 401..=1350 {
            let pct = c.percent_from_rpm(rpm);
            assert!(pct >= last);
            assert!((0.0..=100.0).contains(&pct));
            last = pct;
        }
    }

    #[test]
    fn test_register_anchors() {
        let c = UnitConverter::default();
        assert_eq!(c.register_from_percent(4.0), 3510);
        assert_eq!(c.register_from_percent(100.0), 12150);
        assert_eq!(c.register_from_percent(50.0), 7650);
        assert_eq!(c.register_from_percent(4.5), 3555);
    }

    #[test]
    fn test_register_monotonic() {
        let c = UnitConverter::default();
        let mut last = c.register_from_percent(4.0);
        let mut pct = 4.0;
        while pct <= 100.0 {
            let reg = c.register_from_percent(pct);
            assert!(reg >= last);
            last = reg;
            pct += 0.25;
        }
    }

    #[test]
    fn test_clamp_command() {
        let c = UnitConverter::default();
        assert_eq!(c.clamp_command(150.0), 100.0);
        assert_eq!(c.clamp_command(-5.0), 4.0);
        assert_eq!(c.clamp_command(42.5), 42.5);
    }

    #[test]
    fn test_sample_from_registers() {
        let c = UnitConverter::default();
        let sample = c.sample(1350, 650);
        assert_eq!(sample.rpm, 404);
        assert_eq!(sample.torque, 500);
        assert!(close(sample.percent, 5.4));
    }

    #[test]
    fn test_deterministic() {
        let c = UnitConverter::default();
        assert_eq!(c.sample(3000, 100), c.sample(3000, 100));
        assert_eq!(c.register_from_percent(33.3), c.register_from_percent(33.3));
    }

    #[test]
    fn test_custom_scaling() {
        let c = UnitConverter::new(ScalingConfig {
            rpm_divisor: 2.0,
            min_rpm: 0.0,
            max_rpm: 1000.0,
            min_pct: 0.0,
            ..Default::default()
        });
        assert_eq!(c.rpm_from_raw(1000), 500);
        assert!(close(c.percent_from_rpm(500), 50.0));
    }

    #[test]
    fn test_validate_scaling() {
        assert!(ScalingConfig::default().validate().is_empty());

        let bad = ScalingConfig {
            rpm_divisor: 0.0,
            max_rpm: 100.0,
            min_rpm: 200.0,
            min_percent: 2.0,
            ..Default::default()
        };
        assert_eq!(bad.validate().len(), 3);
    }
}
