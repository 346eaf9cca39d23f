use gaea_scene::Location;

/// A look-at navigator: the eye orbits a point on the globe's surface at a
/// range, with a heading, tilt and roll.
#[derive(Clone, Debug, PartialEq)]
pub struct LookAtNavigator {
    pub look_at_location: Location,
    /// Distance from the look-at point to the eye, meters.
    pub range: f64,
    /// Degrees clockwise from north.
    pub heading: f64,
    /// Degrees away from the surface normal at the look-at point.
    pub tilt: f64,
    pub roll: f64,
}

impl Default for LookAtNavigator {
    fn default() -> Self {
        Self {
            look_at_location: Location::new(30.0, -110.0),
            range: 10_000_000.0,
            heading: 0.0,
            tilt: 0.0,
            roll: 0.0,
        }
    }
}
