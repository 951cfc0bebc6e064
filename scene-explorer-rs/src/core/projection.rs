//! Geographic to local metric projections.
//!
//! Drone recordings publish a UTM origin and their local coordinates are UTM
//! minus that origin. Intersection recordings publish a lat/lon reference
//! point and are placed with a local equirectangular approximation.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use thiserror::Error;

use super::geometry::Point;

/// WGS84 equatorial radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

const LONGLAT_WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Errors that can occur while projecting coordinates.
#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("Invalid projection definition '{definition}': {message}")]
    Definition { definition: String, message: String },

    #[error("Transform failed for ({lat}, {lon}): {message}")]
    Transform { lat: f64, lon: f64, message: String },

    #[error("Coordinate out of range: lat={lat}, lon={lon}")]
    OutOfRange { lat: f64, lon: f64 },
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// UTM zone number (1..=60) for a longitude in degrees.
pub fn utm_zone_for(lon: f64) -> u8 {
    let zone = ((lon + 180.0) / 6.0).floor() as i64 + 1;
    zone.clamp(1, 60) as u8
}

fn check_range(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(ProjectionError::OutOfRange { lat, lon });
    }
    Ok(())
}

/// UTM projection with a local origin subtracted.
pub struct UtmProjection {
    zone: u8,
    south: bool,
    origin: Point,
    src: Proj,
    dst: Proj,
}

impl UtmProjection {
    /// Creates a UTM projection for the zone containing `(ref_lat, ref_lon)`.
    ///
    /// Projected coordinates have `origin` (in UTM meters) subtracted.
    pub fn new(ref_lat: f64, ref_lon: f64, origin: Point) -> Result<Self> {
        check_range(ref_lat, ref_lon)?;
        let zone = utm_zone_for(ref_lon);
        let south = ref_lat < 0.0;
        let definition = format!(
            "+proj=utm +zone={}{} +datum=WGS84 +units=m +no_defs",
            zone,
            if south { " +south" } else { "" }
        );

        let src = Proj::from_proj_string(LONGLAT_WGS84).map_err(|e| ProjectionError::Definition {
            definition: LONGLAT_WGS84.to_string(),
            message: format!("{e:?}"),
        })?;
        let dst = Proj::from_proj_string(&definition).map_err(|e| ProjectionError::Definition {
            definition: definition.clone(),
            message: format!("{e:?}"),
        })?;

        Ok(Self {
            zone,
            south,
            origin,
            src,
            dst,
        })
    }

    /// UTM zone in use.
    pub fn zone(&self) -> u8 {
        self.zone
    }

    /// Returns true for southern-hemisphere zones.
    pub fn is_south(&self) -> bool {
        self.south
    }

    /// Projects WGS84 degrees to local meters.
    pub fn project(&self, lat: f64, lon: f64) -> Result<Point> {
        check_range(lat, lon)?;
        // proj4rs takes geographic input in radians
        let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
        transform(&self.src, &self.dst, &mut point).map_err(|e| ProjectionError::Transform {
            lat,
            lon,
            message: format!("{e:?}"),
        })?;
        Ok([point.0 - self.origin[0], point.1 - self.origin[1]])
    }
}

/// Local equirectangular approximation about a reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equirectangular {
    pub lat0: f64,
    pub lon0: f64,
}

impl Equirectangular {
    pub fn new(lat0: f64, lon0: f64) -> Result<Self> {
        check_range(lat0, lon0)?;
        Ok(Self { lat0, lon0 })
    }

    /// Projects WGS84 degrees to meters east/north of the reference point.
    pub fn project(&self, lat: f64, lon: f64) -> Result<Point> {
        check_range(lat, lon)?;
        let x = EARTH_RADIUS_M * (lon - self.lon0).to_radians() * self.lat0.to_radians().cos();
        let y = EARTH_RADIUS_M * (lat - self.lat0).to_radians();
        Ok([x, y])
    }
}

/// Family-specific projection strategy.
pub enum Projection {
    Utm(UtmProjection),
    Equirectangular(Equirectangular),
}

impl Projection {
    /// Projects WGS84 degrees into the local frame of this strategy.
    pub fn project(&self, lat: f64, lon: f64) -> Result<Point> {
        match self {
            Projection::Utm(p) => p.project(lat, lon),
            Projection::Equirectangular(p) => p.project(lat, lon),
        }
    }

    /// Short strategy name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Projection::Utm(_) => "utm",
            Projection::Equirectangular(_) => "equirectangular",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utm_zone_for() {
        assert_eq!(utm_zone_for(6.1), 32); // Aachen
        assert_eq!(utm_zone_for(117.2), 50); // Tianjin
        assert_eq!(utm_zone_for(-180.0), 1);
        assert_eq!(utm_zone_for(180.0), 60);
    }

    #[test]
    fn test_equirectangular_origin_is_zero() {
        let p = Equirectangular::new(39.0, 117.0).unwrap();
        let o = p.project(39.0, 117.0).unwrap();
        assert!(o[0].abs() < 1e-9 && o[1].abs() < 1e-9);

        let north = p.project(39.001, 117.0).unwrap();
        assert!((north[1] - 111.32).abs() < 0.1);
        assert!(north[0].abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let p = Equirectangular::new(0.0, 0.0).unwrap();
        assert!(matches!(p.project(91.0, 0.0), Err(ProjectionError::OutOfRange { .. })));
    }

    #[test]
    fn test_utm_relative_to_origin() {
        let utm = UtmProjection::new(50.78, 6.06, [0.0, 0.0]).unwrap();
        let abs = utm.project(50.78, 6.06).unwrap();
        // Zone 32 easting for 6.06E sits west of the central meridian (9E)
        assert!(abs[0] > 250_000.0 && abs[0] < 500_000.0);
        assert!(abs[1] > 5_500_000.0 && abs[1] < 5_700_000.0);

        let rel = UtmProjection::new(50.78, 6.06, abs).unwrap();
        let zero = rel.project(50.78, 6.06).unwrap();
        assert!(zero[0].abs() < 1e-6 && zero[1].abs() < 1e-6);
    }
}
