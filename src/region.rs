// Region metadata and 2-D geometry for device locations

use serde::{Deserialize, Serialize};

/// A device location within the region's coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Point2D { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned bounding rectangle of the region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Bounds {
            x,
            y,
            width,
            height,
        }
    }
}

/// Metadata describing the monitored region.
///
/// The decoded background image lives in memory only; persistence keeps just
/// the URL it was fetched from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionInfo {
    pub uri: Option<String>,
    pub bounds: Option<Bounds>,
    pub image_url: Option<String>,
    pub image_bytes: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-12);
        assert!((b.distance_to(&a) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_region_info_default_is_empty() {
        let region = RegionInfo::default();
        assert!(region.uri.is_none());
        assert!(region.bounds.is_none());
        assert!(region.image_url.is_none());
        assert!(region.image_bytes.is_none());
    }
}
