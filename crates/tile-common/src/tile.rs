//! Tile keys and tile ranges on the Web Mercator (XYZ) grid.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{TileError, TileResult};

/// Highest zoom level accepted; keeps `2^zoom` inside `u32`.
pub const MAX_ZOOM: u32 = 30;

/// Number of tiles along one axis at a zoom level.
pub fn grid_size(zoom: u32) -> u32 {
    1u32 << zoom
}

/// A tile coordinate (z/x/y), top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    /// Zoom level
    pub zoom: u32,
    /// Column (x)
    pub x: u32,
    /// Row (y)
    pub y: u32,
}

impl TileKey {
    /// Create a key, enforcing `0 <= x, y < 2^zoom`.
    pub fn try_new(zoom: u32, x: u32, y: u32) -> TileResult<Self> {
        if zoom > MAX_ZOOM {
            return Err(TileError::InvalidTileKey(format!(
                "zoom {} exceeds maximum {}",
                zoom, MAX_ZOOM
            )));
        }
        let n = grid_size(zoom);
        if x >= n || y >= n {
            return Err(TileError::InvalidTileKey(format!(
                "{}/{}/{} outside {}x{} grid",
                zoom, x, y, n, n
            )));
        }
        Ok(Self { zoom, x, y })
    }

    /// Re-check the grid invariant (keys built with struct literals skip it).
    pub fn validate(&self) -> TileResult<()> {
        Self::try_new(self.zoom, self.x, self.y).map(|_| ())
    }

    /// Generate the cache key string (`zoom_x_y`).
    pub fn cache_key(&self) -> String {
        format!("{}_{}_{}", self.zoom, self.x, self.y)
    }

    /// File name under which the rendered tile is stored and served.
    pub fn file_name(&self) -> String {
        format!("{}.png", self.cache_key())
    }

    /// Parse `{z}_{x}_{y}.png` (or the bare `{z}_{x}_{y}`).
    pub fn parse_file_name(name: &str) -> TileResult<Self> {
        let stem = name.strip_suffix(".png").unwrap_or(name);
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() != 3 {
            return Err(TileError::InvalidTileKey(format!(
                "expected '{{z}}_{{x}}_{{y}}.png', got '{}'",
                name
            )));
        }

        let parse = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| TileError::InvalidTileKey(format!("not a tile index: '{}'", s)))
        };

        Self::try_new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// An inclusive rectangular block of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub zoom: u32,
    pub x_from: u32,
    pub x_to: u32,
    pub y_from: u32,
    pub y_to: u32,
}

impl TileRange {
    /// Create a range; both corners must be valid keys and `from <= to`.
    pub fn try_new(zoom: u32, x_from: u32, x_to: u32, y_from: u32, y_to: u32) -> TileResult<Self> {
        TileKey::try_new(zoom, x_from, y_from)?;
        TileKey::try_new(zoom, x_to, y_to)?;
        if x_from > x_to || y_from > y_to {
            return Err(TileError::InvalidRange(format!(
                "x {}..={} / y {}..={} is empty",
                x_from, x_to, y_from, y_to
            )));
        }
        Ok(Self {
            zoom,
            x_from,
            x_to,
            y_from,
            y_to,
        })
    }

    /// Number of tiles in the range.
    pub fn len(&self) -> u64 {
        (self.x_to - self.x_from + 1) as u64 * (self.y_to - self.y_from + 1) as u64
    }

    /// A validated range is never empty; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a key lies inside the range.
    pub fn contains(&self, key: &TileKey) -> bool {
        key.zoom == self.zoom
            && (self.x_from..=self.x_to).contains(&key.x)
            && (self.y_from..=self.y_to).contains(&key.y)
    }

    /// Iterate the keys row by row.
    pub fn iter(&self) -> impl Iterator<Item = TileKey> + '_ {
        let zoom = self.zoom;
        (self.y_from..=self.y_to)
            .flat_map(move |y| (self.x_from..=self.x_to).map(move |x| TileKey { zoom, x, y }))
    }
}

impl fmt::Display for TileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}..{}/{}..{}",
            self.zoom, self.x_from, self.x_to, self.y_from, self.y_to
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_new_bounds() {
        assert!(TileKey::try_new(0, 0, 0).is_ok());
        assert!(TileKey::try_new(0, 1, 0).is_err());
        assert!(TileKey::try_new(10, 1023, 1023).is_ok());
        assert!(TileKey::try_new(10, 1024, 0).is_err());
        assert!(TileKey::try_new(MAX_ZOOM + 1, 0, 0).is_err());
    }

    #[test]
    fn test_cache_key_and_file_name() {
        let key = TileKey::try_new(10, 557, 364).unwrap();
        assert_eq!(key.cache_key(), "10_557_364");
        assert_eq!(key.file_name(), "10_557_364.png");
        assert_eq!(TileKey::parse_file_name("10_557_364.png").unwrap(), key);
        assert_eq!(TileKey::parse_file_name("10_557_364").unwrap(), key);
    }

    #[test]
    fn test_parse_file_name_rejects_garbage() {
        assert!(TileKey::parse_file_name("10_557.png").is_err());
        assert!(TileKey::parse_file_name("a_b_c.png").is_err());
        assert!(TileKey::parse_file_name("10_-1_3.png").is_err());
        assert!(TileKey::parse_file_name("2_4_0.png").is_err());
    }

    #[test]
    fn test_range_len_and_iter() {
        let range = TileRange::try_new(10, 555, 560, 360, 370).unwrap();
        assert_eq!(range.len(), 66);
        let keys: Vec<TileKey> = range.iter().collect();
        assert_eq!(keys.len(), 66);
        assert_eq!(keys[0], TileKey { zoom: 10, x: 555, y: 360 });
        assert_eq!(keys[65], TileKey { zoom: 10, x: 560, y: 370 });
        assert!(keys.iter().all(|k| range.contains(k)));
    }

    #[test]
    fn test_range_rejects_inverted_or_out_of_grid() {
        assert!(matches!(
            TileRange::try_new(3, 5, 4, 0, 0),
            Err(TileError::InvalidRange(_))
        ));
        assert!(matches!(
            TileRange::try_new(3, 0, 8, 0, 0),
            Err(TileError::InvalidTileKey(_))
        ));
    }
}
