// src/mapping.rs
//
// Pixel -> physical coordinate engine: zone classification followed by
// per-zone perspective correction.

use nalgebra::Vector3;

use crate::calibration::Zone;
use crate::types::{PhysicalPoint, PixelPoint};

/// Homogeneous denominators below this magnitude are treated as degenerate.
const W_EPSILON: f64 = 1e-9;

/// Classifies a pixel into one of the enclosure's zones.
///
/// Zones are evaluated in their declared priority order and the first zone
/// whose polygon contains the point wins. The calibration process is assumed
/// to keep polygons non-overlapping; classification never validates this.
pub struct RegionClassifier {
    zones: Vec<Zone>,
}

impl RegionClassifier {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }

    /// First zone containing `point`, boundary counted as inside. `None`
    /// when the point lies outside every zone (a wall, the ceiling).
    pub fn classify(&self, point: PixelPoint) -> Option<&Zone> {
        self.zones
            .iter()
            .find(|zone| polygon_contains(&zone.vertices, point))
    }
}

/// Inclusive point-in-polygon test. Vertices and edges count as inside; the
/// edge check runs in exact integer arithmetic so boundary pixels never fall
/// to floating-point rounding.
fn polygon_contains(vertices: &[[i32; 2]], point: PixelPoint) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        if on_segment(vertices[i], vertices[(i + 1) % n], point) {
            return true;
        }
    }

    // Even-odd ray cast for strict interior.
    let (px, py) = (f64::from(point.x), f64::from(point.y));
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (f64::from(vertices[i][0]), f64::from(vertices[i][1]));
        let (xj, yj) = (f64::from(vertices[j][0]), f64::from(vertices[j][1]));
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn on_segment(a: [i32; 2], b: [i32; 2], p: PixelPoint) -> bool {
    let cross = i64::from(b[0] - a[0]) * i64::from(p.y - a[1])
        - i64::from(b[1] - a[1]) * i64::from(p.x - a[0]);
    if cross != 0 {
        return false;
    }
    p.x >= a[0].min(b[0]) && p.x <= a[0].max(b[0]) && p.y >= a[1].min(b[1]) && p.y <= a[1].max(b[1])
}

/// Projects a pixel into the physical frame of the given zone.
///
/// The homography rectifies camera perspective within the zone; each axis is
/// then scaled independently into meters, shifted by the zone's placement
/// offset, and given the zone's fixed z estimate (no depth sensor exists).
/// A near-zero homogeneous denominator yields the sentinel, never a division.
pub fn map_to_physical(point: PixelPoint, zone: &Zone) -> PhysicalPoint {
    let pixel = Vector3::new(f64::from(point.x), f64::from(point.y), 1.0);
    let rectified = zone.homography_matrix() * pixel;

    let w = rectified[2];
    if w.abs() < W_EPSILON {
        return PhysicalPoint::SENTINEL;
    }

    PhysicalPoint {
        x: rectified[0] / w * zone.x_scale() + zone.offset_x_m,
        y: rectified[1] / w * zone.y_scale() + zone.offset_y_m,
        z: zone.z_estimate_m,
    }
}

/// Classification and perspective mapping composed behind one call.
pub struct SpatialMapper {
    classifier: RegionClassifier,
}

impl SpatialMapper {
    pub fn new(classifier: RegionClassifier) -> Self {
        Self { classifier }
    }

    /// Sentinel when the point is outside every zone or the zone's
    /// homography is degenerate at that pixel. Pure: repeated calls with the
    /// same point yield float-equal results for fixed calibration.
    pub fn get_3d_from_pixel(&self, point: PixelPoint) -> PhysicalPoint {
        match self.classifier.classify(point) {
            Some(zone) => map_to_physical(point, zone),
            None => PhysicalPoint::SENTINEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Zone;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn mk_zone(id: &str, vertices: Vec<[i32; 2]>, homography: [[f64; 3]; 3]) -> Zone {
        Zone {
            id: id.to_string(),
            vertices,
            width_m: 1.0,
            length_m: 1.0,
            z_estimate_m: 0.0,
            offset_x_m: 0.0,
            offset_y_m: 0.0,
            homography,
        }
    }

    /// The reference enclosure's floor: polygon from the calibration sheet,
    /// rectifying translation into its own bounding box.
    fn floor_zone() -> Zone {
        Zone {
            id: "floor".to_string(),
            vertices: vec![[1185, 200], [1480, 185], [2475, 1520], [1030, 1520]],
            width_m: 3.04,
            length_m: 10.54,
            z_estimate_m: 0.2,
            offset_x_m: 0.51,
            offset_y_m: 0.0,
            homography: [[1.0, 0.0, -1030.0], [0.0, 1.0, -185.0], [0.0, 0.0, 1.0]],
        }
    }

    #[test]
    fn test_classify_inside_floor() {
        let classifier = RegionClassifier::new(vec![floor_zone()]);
        let zone = classifier.classify(PixelPoint::new(1500, 800)).unwrap();
        assert_eq!(zone.id, "floor");
    }

    #[test]
    fn test_classify_boundary_is_inside() {
        let classifier = RegionClassifier::new(vec![floor_zone()]);
        // A vertex and a point on the bottom edge both count as inside.
        assert!(classifier.classify(PixelPoint::new(1185, 200)).is_some());
        assert!(classifier.classify(PixelPoint::new(2000, 1520)).is_some());
    }

    #[test]
    fn test_classify_outside_every_zone() {
        let classifier = RegionClassifier::new(vec![floor_zone()]);
        assert!(classifier.classify(PixelPoint::new(10, 10)).is_none());
        assert!(classifier.classify(PixelPoint::new(2600, 100)).is_none());
    }

    #[test]
    fn test_classify_first_match_wins() {
        let under = mk_zone("under", vec![[0, 0], [100, 0], [100, 100], [0, 100]], IDENTITY);
        let over = mk_zone("over", vec![[50, 50], [150, 50], [150, 150], [50, 150]], IDENTITY);
        let classifier = RegionClassifier::new(vec![under, over]);
        // (60, 60) lies in both polygons; declaration order decides.
        let zone = classifier.classify(PixelPoint::new(60, 60)).unwrap();
        assert_eq!(zone.id, "under");
    }

    #[test]
    fn test_floor_mapping_lands_in_physical_range() {
        let mapper = SpatialMapper::new(RegionClassifier::new(vec![floor_zone()]));
        let p = mapper.get_3d_from_pixel(PixelPoint::new(1500, 800));
        assert!(!p.is_sentinel());
        assert!(p.x >= 0.0 && p.x <= 3.55, "x out of range: {}", p.x);
        assert!(p.y >= 0.0 && p.y <= 10.54, "y out of range: {}", p.y);
        assert!((p.z - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unmapped_pixel_is_exact_sentinel() {
        let mapper = SpatialMapper::new(RegionClassifier::new(vec![floor_zone()]));
        let p = mapper.get_3d_from_pixel(PixelPoint::new(10, 10));
        assert_eq!(p, PhysicalPoint::SENTINEL);
    }

    #[test]
    fn test_degenerate_homography_yields_sentinel_not_nan() {
        let mut zone = mk_zone("flat", vec![[0, 0], [100, 0], [100, 100], [0, 100]], IDENTITY);
        zone.homography[2] = [0.0, 0.0, 0.0];
        let p = map_to_physical(PixelPoint::new(50, 50), &zone);
        assert_eq!(p, PhysicalPoint::SENTINEL);
        assert!(!p.x.is_nan() && !p.y.is_nan() && !p.z.is_nan());
    }

    #[test]
    fn test_mapping_is_idempotent() {
        let mapper = SpatialMapper::new(RegionClassifier::new(vec![floor_zone()]));
        let a = mapper.get_3d_from_pixel(PixelPoint::new(1600, 900));
        let b = mapper.get_3d_from_pixel(PixelPoint::new(1600, 900));
        assert_eq!(a, b);
    }

    #[test]
    fn test_scales_differ_per_axis() {
        let zone = floor_zone();
        // Physical and perspective aspect ratios are unequal, so the axis
        // factors must be applied independently.
        assert!((zone.x_scale() - zone.y_scale()).abs() > 1e-6);
    }
}
