use serde::{Deserialize, Serialize};

/// Pixel-space position of an agent. Agents move tile to tile, so the
/// value is always the center of some tile.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Center of tile `(tile_x, tile_y)` on a grid of `tile_size` pixel squares
    pub fn tile_center(tile_x: i32, tile_y: i32, tile_size: f32) -> Self {
        let half = tile_size * 0.5;
        Self::new(tile_x as f32 * tile_size + half, tile_y as f32 * tile_size + half)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Exact bit pattern, used where two runs must compare byte-for-byte
    pub fn to_bits(&self) -> (u32, u32) {
        (self.x.to_bits(), self.y.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_centers_sit_mid_tile() {
        assert_eq!(Vec2::tile_center(0, 0, 32.0), Vec2::new(16.0, 16.0));
        assert_eq!(Vec2::tile_center(2, 3, 32.0), Vec2::new(80.0, 112.0));
    }

    #[test]
    fn non_finite_positions_detected() {
        assert!(Vec2::new(1.0, -4.0).is_finite());
        assert!(!Vec2::new(f32::NAN, 0.0).is_finite());
        assert!(!Vec2::new(0.0, f32::INFINITY).is_finite());
    }

    #[test]
    fn bits_separate_signed_zero() {
        assert_ne!(Vec2::new(0.0, 0.0).to_bits(), Vec2::new(-0.0, 0.0).to_bits());
        assert_eq!(Vec2::new(2.5, 1.0).to_bits(), Vec2::new(2.5, 1.0).to_bits());
    }

    #[test]
    fn serializes_as_xy_object() {
        let json = serde_json::to_value(Vec2::new(1.5, -2.5)).unwrap();
        assert_eq!(json, serde_json::json!({"x": 1.5, "y": -2.5}));
    }
}
