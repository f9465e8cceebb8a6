// src/coordinate.rs

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::mapping::SpatialMapper;
use crate::output::ObservationSink;
use crate::types::{PhysicalPoint, PixelPoint};

/// The single coordinate currently shown on screen. Older records exist
/// only in the external observation log.
#[derive(Debug, Clone, Copy)]
pub struct ActiveCoordinate {
    pub pixel: PixelPoint,
    pub physical: Option<PhysicalPoint>,
    pub captured_at: Instant,
}

/// Owns the active recorded coordinate and its expiry clock.
pub struct CoordinateManager {
    mapper: Option<SpatialMapper>,
    display_duration: Duration,
    active: Option<ActiveCoordinate>,
}

impl CoordinateManager {
    pub fn new(display_duration: Duration, mapper: Option<SpatialMapper>) -> Self {
        Self {
            mapper,
            display_duration,
            active: None,
        }
    }

    pub fn is_3d(&self) -> bool {
        self.mapper.is_some()
    }

    /// Stores `pixel` as the active coordinate and restarts its clock.
    /// Returns the physical projection when 3D mode is enabled.
    ///
    /// Caller contract: every call must be followed by exactly one append to
    /// the observation log before the coordinate is shown on screen.
    pub fn set_coordinate(&mut self, pixel: PixelPoint, now: Instant) -> Option<PhysicalPoint> {
        let physical = self.mapper.as_ref().map(|m| m.get_3d_from_pixel(pixel));
        self.active = Some(ActiveCoordinate {
            pixel,
            physical,
            captured_at: now,
        });
        physical
    }

    pub fn active(&self) -> Option<&ActiveCoordinate> {
        self.active.as_ref()
    }

    /// Explicit user clear: removes the on-screen coordinate and retracts
    /// the row it appended, exactly once. No-op when nothing is active.
    pub fn clear_recorded(&mut self, log: &mut dyn ObservationSink) -> Result<()> {
        if self.active.take().is_some() {
            log.delete_last()?;
        }
        Ok(())
    }

    /// Display-only clear, used when annotation entry takes over the frame.
    /// The logged row stays; only the on-screen text goes away.
    pub fn suppress(&mut self) {
        self.active = None;
    }

    /// Passive display timeout. Clears the active coordinate for display
    /// purposes but never mutates the log; the asymmetry with
    /// `clear_recorded` is an intentional contract (see DESIGN.md), not an
    /// oversight.
    pub fn expire(&mut self, now: Instant) {
        if let Some(active) = &self.active {
            if now.duration_since(active.captured_at) >= self.display_duration {
                self.active = None;
            }
        }
    }
}
