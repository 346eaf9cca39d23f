use serde::{Deserialize, Serialize};

use crate::math::DEGREES_TO_RADIANS;
use crate::Location;

/// An axis-aligned geographic rectangle, bounds in degrees.
///
/// Invariant: `min_latitude <= max_latitude` and
/// `min_longitude <= max_longitude`. Sectors never span the antimeridian;
/// callers that need that split into two sectors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Sector {
    pub const ZERO: Sector = Sector {
        min_latitude: 0.0,
        max_latitude: 0.0,
        min_longitude: 0.0,
        max_longitude: 0.0,
    };

    pub const FULL_SPHERE: Sector = Sector {
        min_latitude: -90.0,
        max_latitude: 90.0,
        min_longitude: -180.0,
        max_longitude: 180.0,
    };

    pub fn new(min_latitude: f64, max_latitude: f64, min_longitude: f64, max_longitude: f64) -> Self {
        Self {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
        }
    }

    pub fn is_empty(&self) -> bool {
        return self.min_latitude == self.max_latitude && self.min_longitude == self.max_longitude;
    }

    pub fn delta_latitude(&self) -> f64 {
        return self.max_latitude - self.min_latitude;
    }

    pub fn delta_longitude(&self) -> f64 {
        return self.max_longitude - self.min_longitude;
    }

    pub fn centroid_latitude(&self) -> f64 {
        return 0.5 * (self.min_latitude + self.max_latitude);
    }

    pub fn centroid_longitude(&self) -> f64 {
        return 0.5 * (self.min_longitude + self.max_longitude);
    }

    pub fn centroid(&self) -> Location {
        return Location::new(self.centroid_latitude(), self.centroid_longitude());
    }

    pub fn min_latitude_radians(&self) -> f64 {
        return self.min_latitude * DEGREES_TO_RADIANS;
    }

    pub fn max_latitude_radians(&self) -> f64 {
        return self.max_latitude * DEGREES_TO_RADIANS;
    }

    pub fn min_longitude_radians(&self) -> f64 {
        return self.min_longitude * DEGREES_TO_RADIANS;
    }

    pub fn max_longitude_radians(&self) -> f64 {
        return self.max_longitude * DEGREES_TO_RADIANS;
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        return self.min_latitude <= latitude
            && self.max_latitude >= latitude
            && self.min_longitude <= longitude
            && self.max_longitude >= longitude;
    }

    pub fn contains_location(&self, location: &Location) -> bool {
        return self.contains(location.latitude, location.longitude);
    }

    pub fn contains_sector(&self, that: &Sector) -> bool {
        return self.min_latitude <= that.min_latitude
            && self.max_latitude >= that.max_latitude
            && self.min_longitude <= that.min_longitude
            && self.max_longitude >= that.max_longitude;
    }

    /// True when the sectors intersect, shared edges included.
    pub fn intersects(&self, that: &Sector) -> bool {
        return self.min_longitude <= that.max_longitude
            && self.max_longitude >= that.min_longitude
            && self.min_latitude <= that.max_latitude
            && self.max_latitude >= that.min_latitude;
    }

    /// True when the sectors overlap with positive area, shared edges
    /// excluded.
    pub fn overlaps(&self, that: &Sector) -> bool {
        return self.min_longitude < that.max_longitude
            && self.max_longitude > that.min_longitude
            && self.min_latitude < that.max_latitude
            && self.max_latitude > that.min_latitude;
    }

    pub fn union(&self, that: &Sector) -> Sector {
        return Sector::new(
            self.min_latitude.min(that.min_latitude),
            self.max_latitude.max(that.max_latitude),
            self.min_longitude.min(that.min_longitude),
            self.max_longitude.max(that.max_longitude),
        );
    }

    /// The overlapping region, or `None` when the sectors are disjoint.
    pub fn intersection(&self, that: &Sector) -> Option<Sector> {
        let result = Sector::new(
            self.min_latitude.max(that.min_latitude),
            self.max_latitude.min(that.max_latitude),
            self.min_longitude.max(that.min_longitude),
            self.max_longitude.min(that.max_longitude),
        );
        if result.min_latitude > result.max_latitude || result.min_longitude > result.max_longitude
        {
            return None;
        }
        return Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_json_bounds() {
        let sector: Sector = serde_json::from_str(
            r#"{"min_latitude": -10.0, "max_latitude": 10.0,
                "min_longitude": 20.0, "max_longitude": 40.0}"#,
        )
        .unwrap();
        assert_eq!(sector, Sector::new(-10.0, 10.0, 20.0, 40.0));
    }

    #[test]
    fn intersects_counts_shared_edges_overlaps_does_not() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(10.0, 20.0, 0.0, 10.0);
        assert!(a.intersects(&b));
        assert!(!a.overlaps(&b));

        let c = Sector::new(5.0, 15.0, 5.0, 15.0);
        assert!(a.overlaps(&c));
    }

    #[test]
    fn union_and_intersection() {
        let a = Sector::new(0.0, 10.0, 0.0, 10.0);
        let b = Sector::new(5.0, 20.0, -5.0, 5.0);
        assert_eq!(a.union(&b), Sector::new(0.0, 20.0, -5.0, 10.0));
        assert_eq!(
            a.intersection(&b),
            Some(Sector::new(5.0, 10.0, 0.0, 5.0))
        );

        let disjoint = Sector::new(50.0, 60.0, 50.0, 60.0);
        assert_eq!(a.intersection(&disjoint), None);
    }

    #[test]
    fn full_sphere_contains_everything() {
        assert!(Sector::FULL_SPHERE.contains(-90.0, -180.0));
        assert!(Sector::FULL_SPHERE.contains(90.0, 180.0));
        assert!(Sector::FULL_SPHERE.contains_sector(&Sector::new(-10.0, 10.0, -20.0, 20.0)));
    }
}
