//! Town layout: walkable tiles and named locations
//!
//! The map is fixed. Walkability is a packed bit grid; locations are
//! rectangular areas agents walk to for activities.

use bitvec::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::sim::constants::map::{HEIGHT, TILE_SIZE, WIDTH};
use crate::util::vec2::Vec2;

/// Discrete tile coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Pixel-space center of this tile
    #[inline]
    pub fn center(&self) -> Vec2 {
        Vec2::tile_center(self.x, self.y, TILE_SIZE)
    }

    #[inline]
    pub fn manhattan(&self, other: TilePos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

pub type LocationId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Home,
    Cafe,
    Market,
    Park,
    Library,
    Plaza,
    Workshop,
}

/// Named rectangular area (bounds inclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub kind: LocationKind,
    pub min: TilePos,
    pub max: TilePos,
}

impl Location {
    #[inline]
    pub fn contains(&self, tile: TilePos) -> bool {
        tile.x >= self.min.x && tile.x <= self.max.x && tile.y >= self.min.y && tile.y <= self.max.y
    }

    pub fn center(&self) -> TilePos {
        TilePos::new((self.min.x + self.max.x) / 2, (self.min.y + self.max.y) / 2)
    }

    pub fn area(&self) -> usize {
        ((self.max.x - self.min.x + 1) * (self.max.y - self.min.y + 1)) as usize
    }
}

/// Houses along the north edge
const HOME_COUNT: i32 = 8;
/// Row of hedges separating homes from the town, with gaps
const HEDGE_ROW: i32 = 6;
const HEDGE_GAPS: [i32; 5] = [4, 13, 20, 27, 34];

#[derive(Debug, Clone)]
pub struct TownMap {
    width: i32,
    height: i32,
    walkable: BitVec,
    locations: Vec<Location>,
}

impl TownMap {
    /// The standard town: homes, cafe, market, library, plaza, park with a pond, workshop
    pub fn standard() -> Self {
        let mut map = Self {
            width: WIDTH,
            height: HEIGHT,
            walkable: bitvec![1; (WIDTH * HEIGHT) as usize],
            locations: Vec::new(),
        };

        for i in 0..HOME_COUNT {
            let x = 1 + i * 5;
            map.add_location(
                format!("House {}", i + 1),
                LocationKind::Home,
                TilePos::new(x, 1),
                TilePos::new(x + 2, 3),
            );
        }
        map.add_location("Cafe".into(), LocationKind::Cafe, TilePos::new(2, 8), TilePos::new(7, 12));
        map.add_location("Market".into(), LocationKind::Market, TilePos::new(10, 8), TilePos::new(17, 12));
        map.add_location("Library".into(), LocationKind::Library, TilePos::new(30, 8), TilePos::new(37, 12));
        map.add_location("Plaza".into(), LocationKind::Plaza, TilePos::new(16, 14), TilePos::new(23, 18));
        map.add_location("Park".into(), LocationKind::Park, TilePos::new(2, 19), TilePos::new(13, 28));
        map.add_location("Workshop".into(), LocationKind::Workshop, TilePos::new(28, 21), TilePos::new(37, 27));

        for x in 0..WIDTH {
            if !HEDGE_GAPS.contains(&x) {
                map.set_blocked(TilePos::new(x, HEDGE_ROW));
            }
        }
        // Pond in the park
        for y in 22..=25 {
            for x in 5..=9 {
                map.set_blocked(TilePos::new(x, y));
            }
        }

        map
    }

    fn add_location(&mut self, name: String, kind: LocationKind, min: TilePos, max: TilePos) {
        let id = self.locations.len();
        self.locations.push(Location { id, name, kind, min, max });
    }

    fn set_blocked(&mut self, tile: TilePos) {
        if let Some(idx) = self.index(tile) {
            self.walkable.set(idx, false);
        }
    }

    #[inline]
    fn index(&self, tile: TilePos) -> Option<usize> {
        if self.in_bounds(tile) {
            Some((tile.y * self.width + tile.x) as usize)
        } else {
            None
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    #[inline]
    pub fn in_bounds(&self, tile: TilePos) -> bool {
        tile.x >= 0 && tile.y >= 0 && tile.x < self.width && tile.y < self.height
    }

    #[inline]
    pub fn is_walkable(&self, tile: TilePos) -> bool {
        self.index(tile).map(|i| self.walkable[i]).unwrap_or(false)
    }

    pub fn walkable_count(&self) -> usize {
        self.walkable.count_ones()
    }

    /// 4-connected walkable neighbors in a fixed order (N, E, S, W)
    pub fn walkable_neighbors(&self, tile: TilePos) -> SmallVec<[TilePos; 4]> {
        let mut out = SmallVec::new();
        for (dx, dy) in [(0, -1), (1, 0), (0, 1), (-1, 0)] {
            let next = TilePos::new(tile.x + dx, tile.y + dy);
            if self.is_walkable(next) {
                out.push(next);
            }
        }
        out
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn homes(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter().filter(|l| l.kind == LocationKind::Home)
    }

    pub fn first_of_kind(&self, kind: LocationKind) -> Option<&Location> {
        self.locations.iter().find(|l| l.kind == kind)
    }

    pub fn location_at(&self, tile: TilePos) -> Option<&Location> {
        self.locations.iter().find(|l| l.contains(tile))
    }

    /// Random walkable tile inside a location, falling back to its first walkable tile
    pub fn random_tile_in<R: Rng>(&self, location: &Location, rng: &mut R) -> TilePos {
        for _ in 0..8 {
            let tile = TilePos::new(
                rng.gen_range(location.min.x..=location.max.x),
                rng.gen_range(location.min.y..=location.max.y),
            );
            if self.is_walkable(tile) {
                return tile;
            }
        }
        (location.min.y..=location.max.y)
            .flat_map(|y| (location.min.x..=location.max.x).map(move |x| TilePos::new(x, y)))
            .find(|t| self.is_walkable(*t))
            .unwrap_or_else(|| location.center())
    }
}

impl Default for TownMap {
    fn default() -> Self {
        Self::standard()
    }
}
