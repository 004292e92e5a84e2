//! Working cell grid of one document.

use std::num::NonZeroU32;

use carmen_map::{MapCreator, RoadCell, RoadMap, LOCAL_GRIDMAP_RESOLUTION, PROB_MAX};

/// One map cell while lanes are being rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub off_road: u16,
    pub solid_marking: u16,
    pub broken_marking: u16,
    pub lane_center: u16,
    /// Last lane that evaluated this cell, or the lane that claimed it.
    pub owner_lane: Option<NonZeroU32>,
    /// Set once a lane finalizes the cell; never cleared.
    pub claimed: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            off_road: PROB_MAX,
            solid_marking: 0,
            broken_marking: 0,
            lane_center: 0,
            owner_lane: None,
            claimed: false,
        }
    }
}

impl Cell {
    #[inline]
    pub fn probabilities(&self) -> RoadCell {
        RoadCell {
            off_road: self.off_road,
            solid_marking: self.solid_marking,
            broken_marking: self.broken_marking,
            lane_center: self.lane_center,
        }
    }
}

/// Dense `height x width` cell grid, row-major, y pointing up.
#[derive(Debug, Clone)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::default(); width * height],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            None
        } else {
            Some(y as usize * self.width + x as usize)
        }
    }

    #[inline]
    pub fn get(&self, x: i64, y: i64) -> Option<&Cell> {
        self.index(x, y).map(|i| &self.cells[i])
    }

    #[inline]
    pub fn get_mut(&mut self, x: i64, y: i64) -> Option<&mut Cell> {
        self.index(x, y).map(move |i| &mut self.cells[i])
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn claimed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.claimed).count()
    }

    /// Export in the column-major order of the map file payload.
    pub fn to_road_map(&self, creator: MapCreator) -> RoadMap {
        let mut cells = Vec::with_capacity(self.cells.len());
        for x in 0..self.width {
            for y in 0..self.height {
                cells.push(self.cells[y * self.width + x].probabilities());
            }
        }

        RoadMap {
            width: self.width as u32,
            height: self.height as u32,
            resolution: LOCAL_GRIDMAP_RESOLUTION,
            creator,
            cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_grid_is_off_road() {
        let grid = Grid::new(4, 3);
        assert_eq!(grid.cells().len(), 12);
        assert!(grid.cells().iter().all(|c| *c == Cell::default()));
        assert_eq!(grid.get(0, 0).unwrap().off_road, PROB_MAX);
        assert_eq!(grid.claimed_count(), 0);
    }

    #[test]
    fn test_bounds() {
        let mut grid = Grid::new(4, 3);
        assert!(grid.get(3, 2).is_some());
        assert!(grid.get(4, 0).is_none());
        assert!(grid.get(0, 3).is_none());
        assert!(grid.get(-1, 0).is_none());
        assert!(grid.get_mut(0, -1).is_none());
    }

    #[test]
    fn test_export_is_column_major() {
        let mut grid = Grid::new(3, 2);
        let cell = grid.get_mut(2, 1).unwrap();
        cell.off_road = 0;
        cell.lane_center = 123;
        cell.claimed = true;

        let map = grid.to_road_map(MapCreator::default());
        assert_eq!((map.width, map.height), (3, 2));
        assert_eq!(map.resolution, LOCAL_GRIDMAP_RESOLUTION);

        // x = 2, y = 1 is the last of the 6 cells.
        assert_eq!(map.cells[5].lane_center, 123);
        assert_eq!(map.cell(2, 1).unwrap().off_road, 0);
        assert_eq!(map.cells[..5], vec![RoadCell::default(); 5][..]);
        assert_eq!(grid.claimed_count(), 1);
    }
}
