//! Route finding boundary
//!
//! The simulation only needs "a walkable route from A to B". `GridRouter` is a
//! plain breadth-first search; `CachedRouter` memoizes any finder and plans
//! batches of cache misses in parallel.

use std::collections::VecDeque;
use std::sync::Arc;

use bitvec::prelude::*;
use hashbrown::HashMap;
use rayon::prelude::*;

use crate::sim::map::{TilePos, TownMap};

/// Route steps exclude the start tile and end on the target tile
pub trait RouteFinder: Send + Sync {
    fn find_route(&self, map: &TownMap, from: TilePos, to: TilePos) -> Option<Vec<TilePos>>;
}

impl<T: RouteFinder + ?Sized> RouteFinder for Box<T> {
    fn find_route(&self, map: &TownMap, from: TilePos, to: TilePos) -> Option<Vec<TilePos>> {
        (**self).find_route(map, from, to)
    }
}

/// 4-connected breadth-first search over walkable tiles
#[derive(Debug, Default, Clone, Copy)]
pub struct GridRouter;

impl RouteFinder for GridRouter {
    fn find_route(&self, map: &TownMap, from: TilePos, to: TilePos) -> Option<Vec<TilePos>> {
        if from == to {
            return Some(Vec::new());
        }
        if !map.is_walkable(to) {
            return None;
        }

        let width = map.width();
        let cells = (width * map.height()) as usize;
        let index = |t: TilePos| (t.y * width + t.x) as usize;

        let mut visited = bitvec![0; cells];
        let mut came_from = vec![u32::MAX; cells];
        let mut frontier = VecDeque::new();

        if map.in_bounds(from) {
            visited.set(index(from), true);
        }
        frontier.push_back(from);

        while let Some(current) = frontier.pop_front() {
            if current == to {
                let mut path = Vec::new();
                let mut step = index(to);
                let start = if map.in_bounds(from) { index(from) } else { usize::MAX };
                while step != start {
                    path.push(TilePos::new(step as i32 % width, step as i32 / width));
                    let prev = came_from[step];
                    if prev == u32::MAX {
                        break;
                    }
                    step = prev as usize;
                }
                path.reverse();
                return Some(path);
            }
            for next in map.walkable_neighbors(current) {
                let i = index(next);
                if !visited[i] {
                    visited.set(i, true);
                    if map.in_bounds(current) {
                        came_from[i] = index(current) as u32;
                    }
                    frontier.push_back(next);
                }
            }
        }
        None
    }
}

type RouteKey = (TilePos, TilePos);

/// Misses below this count are planned on the calling thread
const PARALLEL_THRESHOLD: usize = 8;

/// Memoizing wrapper around a [`RouteFinder`]
pub struct CachedRouter<F: RouteFinder> {
    inner: F,
    cache: HashMap<RouteKey, Option<Arc<[TilePos]>>>,
    max_entries: usize,
    hits: u64,
    misses: u64,
}

impl<F: RouteFinder> CachedRouter<F> {
    pub fn new(inner: F, max_entries: usize) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
            max_entries: max_entries.max(1),
            hits: 0,
            misses: 0,
        }
    }

    pub fn route(&mut self, map: &TownMap, from: TilePos, to: TilePos) -> Option<Vec<TilePos>> {
        self.plan_batch(map, &[(from, to)]).pop().flatten()
    }

    /// Resolve many routes at once. Results are in request order.
    pub fn plan_batch(&mut self, map: &TownMap, requests: &[RouteKey]) -> Vec<Option<Vec<TilePos>>> {
        let mut missing: Vec<RouteKey> = Vec::new();
        for key in requests {
            if self.cache.contains_key(key) {
                self.hits += 1;
            } else {
                self.misses += 1;
                if !missing.contains(key) {
                    missing.push(*key);
                }
            }
        }

        if !missing.is_empty() {
            let inner = &self.inner;
            let solved: Vec<(RouteKey, Option<Arc<[TilePos]>>)> = if missing.len() >= PARALLEL_THRESHOLD {
                missing
                    .par_iter()
                    .map(|&(from, to)| ((from, to), inner.find_route(map, from, to).map(Arc::from)))
                    .collect()
            } else {
                missing
                    .iter()
                    .map(|&(from, to)| ((from, to), inner.find_route(map, from, to).map(Arc::from)))
                    .collect()
            };

            if self.cache.len() + solved.len() > self.max_entries {
                self.cache.clear();
            }
            // Routes past capacity are returned to the caller but not kept
            let room = self.max_entries.saturating_sub(self.cache.len());
            let mut uncached: HashMap<RouteKey, Option<Arc<[TilePos]>>> = HashMap::new();
            for (index, (key, route)) in solved.into_iter().enumerate() {
                if index < room {
                    self.cache.insert(key, route);
                } else {
                    uncached.insert(key, route);
                }
            }

            return requests
                .iter()
                .map(|key| {
                    let route = self.cache.get(key).or_else(|| uncached.get(key));
                    route.cloned().flatten().map(|p| p.to_vec())
                })
                .collect();
        }

        requests
            .iter()
            .map(|key| self.cache.get(key).cloned().flatten().map(|p| p.to_vec()))
            .collect()
    }

    pub fn size(&self) -> usize {
        self.cache.len()
    }

    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}
