//! Dot style for point rendering.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColorError(String);

impl fmt::Display for ParseColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid colour '{}', expected #RRGGBB or #RRGGBBAA", self.0)
    }
}

impl std::error::Error for ParseColorError {}

impl FromStr for Rgba {
    type Err = ParseColorError;

    /// Parse "#RRGGBB" or "#RRGGBBAA" (leading '#' optional).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(ParseColorError(s.to_string()));
        }

        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ParseColorError(s.to_string()))
        };

        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Rgba::new(channel(0)?, channel(2)?, channel(4)?, a))
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
    }
}

impl Serialize for Rgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How every point of a tile is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointStyle {
    /// Dot radius in pixels
    pub radius: f64,
    /// Dot colour; the alpha channel sets the translucency
    pub color: Rgba,
}

impl Default for PointStyle {
    fn default() -> Self {
        Self {
            radius: 2.0,
            color: Rgba::new(220, 20, 60, 102),
        }
    }
}

impl PointStyle {
    pub fn new(radius: f64, color: Rgba) -> Self {
        Self { radius, color }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!("#FF8000".parse::<Rgba>().unwrap(), Rgba::new(255, 128, 0, 255));
        assert_eq!("dc143c66".parse::<Rgba>().unwrap(), Rgba::new(220, 20, 60, 102));
        assert!("#FFF".parse::<Rgba>().is_err());
        assert!("#GG0000".parse::<Rgba>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let color = Rgba::new(1, 2, 3, 4);
        assert_eq!(color.to_string(), "#01020304");
        assert_eq!(color.to_string().parse::<Rgba>().unwrap(), color);
    }
}
