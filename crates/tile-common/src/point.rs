//! Source points and client viewports.

use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// A single geographic point from the data source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// The visible map area reported by a client on pan/zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub zoom: u32,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Viewport {
    pub fn new(zoom: u32, north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            zoom,
            north,
            south,
            east,
            west,
        }
    }

    /// The viewport as a bounding box.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.west, self.south, self.east, self.north)
    }
}
