//! Tile scheduler: splits the full-resolution frame into tiles rendered one
//! per call, sizing tiles so one tile takes about [`DESIRED_MS_PER_TILE`].

use crate::util::clamp;

pub const DESIRED_MS_PER_TILE: f64 = 21.0;
const MIN_PIXELS_PER_TILE: f64 = 8192.0;

pub fn pixels_per_tile_estimate(max_texture_dimension: u32) -> f64 {
    match max_texture_dimension {
        0..=8192 => 200_000.0,
        8193..=32767 => 400_000.0,
        _ => 600_000.0,
    }
}

/// Screen rectangle of one tile, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub is_first: bool,
    pub is_last: bool,
}

impl Tile {
    /// Intersection with a `width × height` target, `None` when empty.
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.x >= width || self.y >= height {
            return None;
        }
        Some((self.x, self.y, self.width.min(width - self.x), self.height.min(height - self.y)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileRender {
    width: u32,
    height: u32,
    pixels_per_tile: f64,
    tile_width: u32,
    tile_height: u32,
    columns: u32,
    rows: u32,
    current: i64,
    /// Summed frame time of the current pass over all tiles
    total_elapsed: Option<f64>,
}

impl TileRender {
    pub fn new(max_texture_dimension: u32) -> Self {
        let mut t = Self {
            width: 1,
            height: 1,
            pixels_per_tile: pixels_per_tile_estimate(max_texture_dimension),
            tile_width: 1,
            tile_height: 1,
            columns: 1,
            rows: 1,
            current: -1,
            total_elapsed: None,
        };
        t.calc_tile_dimensions();
        t
    }

    pub fn num_tiles(&self) -> u32 {
        self.columns * self.rows
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    pub fn pixels_per_tile(&self) -> f64 {
        self.pixels_per_tile
    }

    /// Restart from the first tile.
    pub fn reset(&mut self) {
        self.current = -1;
        self.total_elapsed = None;
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.reset();
        self.calc_tile_dimensions();
    }

    fn calc_tile_dimensions(&mut self) {
        let (w, h) = (self.width as f64, self.height as f64);
        let aspect = w / h;
        let divisions = (w / (self.pixels_per_tile * aspect).sqrt()).round().max(1.0);
        let tile_width = (w / divisions).ceil();
        let tile_height = (tile_width / aspect).ceil().max(1.0);
        self.tile_width = tile_width as u32;
        self.tile_height = tile_height as u32;
        self.columns = (w / tile_width).ceil() as u32;
        self.rows = (h / tile_height).ceil() as u32;
    }

    fn update_pixels_per_tile(&mut self, total: f64) {
        let ms_per_tile = total / self.num_tiles() as f64;
        let error = DESIRED_MS_PER_TILE - ms_per_tile;
        // sqrt to avoid overcorrecting on a single slow frame
        self.pixels_per_tile += 5000.0 * error.signum() * error.abs().sqrt();
        let full = self.width as f64 * self.height as f64;
        self.pixels_per_tile = clamp(self.pixels_per_tile, MIN_PIXELS_PER_TILE, full);
        self.calc_tile_dimensions();
    }

    /// Advance to the next tile. Each completed pass over the screen
    /// re-tunes the tile size from the accumulated frame times.
    pub fn next_tile(&mut self, elapsed_ms: Option<f64>) -> Tile {
        self.current += 1;
        self.total_elapsed = match (self.total_elapsed, elapsed_ms) {
            (Some(t), Some(e)) if e.is_finite() => Some(t + e),
            _ => None,
        };

        if self.current % self.num_tiles() as i64 == 0 {
            if let Some(total) = self.total_elapsed.filter(|t| *t != 0.0) {
                self.update_pixels_per_tile(total);
            }
            self.total_elapsed = Some(0.0);
            self.current = 0;
        }

        let current = self.current as u32;
        Tile {
            x: (current % self.columns) * self.tile_width,
            y: (current / self.columns % self.rows) * self.tile_height,
            width: self.tile_width,
            height: self.tile_height,
            is_first: current == 0,
            is_last: current == self.num_tiles() - 1,
        }
    }
}
