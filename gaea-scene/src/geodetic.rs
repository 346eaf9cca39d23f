use serde::{Deserialize, Serialize};

/// A geographic location, latitude and longitude in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A geographic position, degrees latitude and longitude plus an altitude in
/// meters above the ellipsoid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    pub fn location(&self) -> Location {
        return Location::new(self.latitude, self.longitude);
    }
}

/// A cardinal direction, used to address a tile's edge neighbors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// Index into a `[T; 4]` neighbor table.
    pub fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::South => 1,
            Direction::East => 2,
            Direction::West => 3,
        }
    }
}

/// How an altitude value is interpreted when resolving a surface point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AltitudeMode {
    /// Altitude is relative to the ellipsoid, ignoring terrain.
    #[default]
    Absolute,
    /// Altitude is ignored; the point sits on the terrain surface.
    ClampToGround,
    /// Altitude is measured upward from the terrain surface.
    RelativeToGround,
}
