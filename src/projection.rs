//! Maps geographic positions onto the 100x100 tactical grid.
//!
//! Grid `x` grows eastward and `y` grows southward, matching the on-screen
//! map. Every projection clamps into the operative bounds `[5, 95]`.

use serde::Serialize;

use crate::error::LinkError;
use crate::geo::Position;

pub const GRID_MIN: f64 = 5.0;
pub const GRID_MAX: f64 = 95.0;
pub const GRID_CENTRE: f64 = 50.0;

/// Mean Earth radius (IUGG), metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
}

impl ProjectedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn clamped(x: f64, y: f64) -> Self {
        Self {
            x: x.clamp(GRID_MIN, GRID_MAX),
            y: y.clamp(GRID_MIN, GRID_MAX),
        }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

pub trait Projection: Send + Sync {
    fn project(&self, pos: Position) -> ProjectedPoint;
}

/// Local equirectangular projection anchored at the facility origin, which
/// lands on the grid centre.
#[derive(Debug, Clone, Copy)]
pub struct Equirectangular {
    origin: Position,
    meters_per_unit: f64,
    cos_lat0: f64,
}

impl Equirectangular {
    pub fn new(origin: Position, meters_per_unit: f64) -> Result<Self, LinkError> {
        if !(meters_per_unit.is_finite() && meters_per_unit > 0.0) {
            return Err(LinkError::Config(format!(
                "meters_per_unit must be positive, got {}",
                meters_per_unit
            )));
        }
        if !(origin.latitude.abs() < 90.0 && origin.longitude.is_finite()) {
            return Err(LinkError::Config(format!(
                "facility origin {:?} is not a usable anchor",
                origin
            )));
        }
        Ok(Self {
            origin,
            meters_per_unit,
            cos_lat0: origin.latitude.to_radians().cos(),
        })
    }
}

impl Projection for Equirectangular {
    fn project(&self, pos: Position) -> ProjectedPoint {
        let east = EARTH_RADIUS_M * (pos.longitude - self.origin.longitude).to_radians() * self.cos_lat0;
        let north = EARTH_RADIUS_M * (pos.latitude - self.origin.latitude).to_radians();
        ProjectedPoint::clamped(
            GRID_CENTRE + east / self.meters_per_unit,
            GRID_CENTRE - north / self.meters_per_unit,
        )
    }
}

/// Periodic fractional-degree mapping: each thousandth of a degree wraps
/// across the grid. Not geodesically meaningful; kept for demonstrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoGrid;

impl Projection for DemoGrid {
    fn project(&self, pos: Position) -> ProjectedPoint {
        ProjectedPoint::clamped(
            (pos.longitude.abs() % 0.001) * 100_000.0,
            (pos.latitude.abs() % 0.001) * 100_000.0,
        )
    }
}

/// Picks the projection named in configuration: `equirectangular` or `demo`.
pub fn from_config(
    kind: &str,
    origin: Position,
    meters_per_unit: f64,
) -> Result<Box<dyn Projection>, LinkError> {
    match kind {
        "equirectangular" => Ok(Box::new(Equirectangular::new(origin, meters_per_unit)?)),
        "demo" => Ok(Box::new(DemoGrid)),
        other => Err(LinkError::Config(format!("unknown projection {:?}", other))),
    }
}
