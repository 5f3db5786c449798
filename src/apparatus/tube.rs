//! Tubing: the physical connection between two components.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A length of tubing. All dimensions are in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tube {
    pub length_mm: f64,
    pub inner_diameter_mm: f64,
    pub outer_diameter_mm: f64,
    pub material: String,
}

impl Tube {
    pub fn new(
        length_mm: f64,
        inner_diameter_mm: f64,
        outer_diameter_mm: f64,
        material: impl Into<String>,
    ) -> Self {
        Self {
            length_mm,
            inner_diameter_mm,
            outer_diameter_mm,
            material: material.into(),
        }
    }

    /// Internal volume in microlitres (mm³).
    pub fn volume_ul(&self) -> f64 {
        PI * (self.inner_diameter_mm / 2.0).powi(2) * self.length_mm
    }

    /// Check the geometry, returning a description of the first problem.
    pub fn check_geometry(&self) -> Result<(), String> {
        if !(self.length_mm > 0.0 && self.inner_diameter_mm > 0.0 && self.outer_diameter_mm > 0.0) {
            return Err("dimensions must be positive".to_string());
        }
        if self.outer_diameter_mm <= self.inner_diameter_mm {
            return Err(format!(
                "outer diameter {} mm must be greater than inner diameter {} mm",
                self.outer_diameter_mm, self.inner_diameter_mm
            ));
        }
        Ok(())
    }

    /// True when the tube is shorter than it is wide, which is legal but
    /// usually a unit mistake.
    pub fn is_suspiciously_short(&self) -> bool {
        self.length_mm < self.outer_diameter_mm
    }
}

/// A directed tube between two named components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
    pub tube: Tube,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_of_one_metre_of_one_mm_tubing() {
        let tube = Tube::new(1000.0, 1.0, 1.6, "PFA");
        assert!((tube.volume_ul() - 785.398).abs() < 1e-3);
    }

    #[test]
    fn outer_diameter_must_exceed_inner() {
        let tube = Tube::new(100.0, 1.6, 1.6, "PTFE");
        assert!(tube.check_geometry().is_err());
    }

    #[test]
    fn zero_length_is_rejected() {
        let tube = Tube::new(0.0, 0.8, 1.6, "PTFE");
        assert!(tube.check_geometry().is_err());
    }
}
