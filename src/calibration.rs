// src/calibration.rs
//
// Per-zone calibration store. Produced by an out-of-session adjustment tool,
// read exactly once at session start, never reloaded mid-session.

use anyhow::{bail, Context, Result};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// One physically distinct structure of the enclosure (floor, nesting area,
/// roost), as a polygonal region of the camera frame plus the precomputed
/// transform into its rectified reference frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    /// Ordered polygon vertices in pixel space.
    pub vertices: Vec<[i32; 2]>,
    /// Physical extent of the zone along the rectified x axis, in meters.
    pub width_m: f64,
    /// Physical extent of the zone along the rectified y axis, in meters.
    pub length_m: f64,
    /// Coarse height estimate for a ground-level subject, in meters.
    pub z_estimate_m: f64,
    /// Placement of the zone-local frame within the room-wide origin.
    #[serde(default)]
    pub offset_x_m: f64,
    #[serde(default)]
    pub offset_y_m: f64,
    /// Row-major 3x3 perspective-correction matrix for this zone.
    pub homography: [[f64; 3]; 3],
}

impl Zone {
    pub fn homography_matrix(&self) -> Matrix3<f64> {
        let h = &self.homography;
        Matrix3::new(
            h[0][0], h[0][1], h[0][2], h[1][0], h[1][1], h[1][2], h[2][0], h[2][1], h[2][2],
        )
    }

    /// Axis-aligned pixel bounding box of the polygon: (x_min, y_min, x_max, y_max).
    pub fn bounding_box(&self) -> (i32, i32, i32, i32) {
        let mut x_min = i32::MAX;
        let mut y_min = i32::MAX;
        let mut x_max = i32::MIN;
        let mut y_max = i32::MIN;
        for v in &self.vertices {
            x_min = x_min.min(v[0]);
            y_min = y_min.min(v[1]);
            x_max = x_max.max(v[0]);
            y_max = y_max.max(v[1]);
        }
        (x_min, y_min, x_max, y_max)
    }

    /// Meters per rectified unit along x. The x and y factors differ because
    /// the physical aspect ratio and the camera perspective aspect ratio are
    /// generally unequal.
    pub fn x_scale(&self) -> f64 {
        let (x_min, _, x_max, _) = self.bounding_box();
        self.width_m / f64::from(x_max - x_min)
    }

    /// Meters per rectified unit along y.
    pub fn y_scale(&self) -> f64 {
        let (_, y_min, _, y_max) = self.bounding_box();
        self.length_m / f64::from(y_max - y_min)
    }

    fn validate(&self) -> Result<()> {
        if self.vertices.len() < 3 {
            bail!(
                "zone '{}' has {} vertices; a polygon needs at least 3",
                self.id,
                self.vertices.len()
            );
        }
        if !(self.width_m > 0.0) || !(self.length_m > 0.0) {
            bail!("zone '{}' has non-positive physical dimensions", self.id);
        }
        let (x_min, y_min, x_max, y_max) = self.bounding_box();
        if x_max <= x_min || y_max <= y_min {
            bail!("zone '{}' has a degenerate pixel bounding box", self.id);
        }
        Ok(())
    }
}

/// Ordered zone list. Order is classification priority: first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibration {
    pub zones: Vec<Zone>,
}

impl Calibration {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration store {path}"))?;
        let calibration: Calibration = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse calibration store {path}"))?;
        calibration.validate()?;
        info!(
            "✓ Calibration loaded: {} zone(s) from {}",
            calibration.zones.len(),
            Path::new(path).display()
        );
        Ok(calibration)
    }

    fn validate(&self) -> Result<()> {
        if self.zones.is_empty() {
            bail!("calibration store contains no zones");
        }
        for zone in &self.zones {
            zone.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_zone(id: &str, vertices: Vec<[i32; 2]>) -> Zone {
        Zone {
            id: id.to_string(),
            vertices,
            width_m: 3.04,
            length_m: 10.54,
            z_estimate_m: 0.2,
            offset_x_m: 0.51,
            offset_y_m: 0.0,
            homography: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    #[test]
    fn test_bounding_box_and_scales() {
        let zone = mk_zone(
            "floor",
            vec![[1185, 200], [1480, 185], [2475, 1520], [1030, 1520]],
        );
        assert_eq!(zone.bounding_box(), (1030, 185, 2475, 1520));
        assert!((zone.x_scale() - 3.04 / 1445.0).abs() < 1e-12);
        assert!((zone.y_scale() - 10.54 / 1335.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_thin_polygon() {
        let zone = mk_zone("bad", vec![[0, 0], [10, 0]]);
        assert!(zone.validate().is_err());

        let flat = mk_zone("flat", vec![[0, 5], [10, 5], [20, 5]]);
        assert!(flat.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_store() {
        let calibration = Calibration { zones: Vec::new() };
        assert!(calibration.validate().is_err());
    }
}
