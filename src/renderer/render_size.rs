//! Adaptive preview resolution.

use crate::util::clamp;

/// Frame time the preview resolution is steered towards.
pub const DESIRED_MS_PER_FRAME: f64 = 20.0;
/// Proportional gain of the pixel budget controller.
const STRENGTH: f64 = 600.0;
pub const MIN_PIXELS_PER_FRAME: f64 = 8192.0;

/// Initial pixel budget guessed from the largest texture the device allows.
pub fn pixels_per_frame_estimate(max_texture_dimension: u32) -> f64 {
    match max_texture_dimension {
        0..=8192 => 80_000.0,
        8193..=32767 => 150_000.0,
        _ => 400_000.0,
    }
}

/// Reduced resolution used for preview frames while the camera moves.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSize {
    full_width: u32,
    full_height: u32,
    width: u32,
    height: u32,
    pixels_per_frame: f64,
    scale: [f32; 2],
}

impl RenderSize {
    pub fn new(max_texture_dimension: u32) -> Self {
        Self {
            full_width: 1,
            full_height: 1,
            width: 1,
            height: 1,
            pixels_per_frame: pixels_per_frame_estimate(max_texture_dimension),
            scale: [1.0, 1.0],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Render size relative to the full size.
    pub fn scale(&self) -> [f32; 2] {
        self.scale
    }

    pub fn pixels_per_frame(&self) -> f64 {
        self.pixels_per_frame
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.full_width = width.max(1);
        self.full_height = height.max(1);
        self.calc_dimensions();
    }

    /// Steer the pixel budget from the last frame time. Unknown or zero times are ignored.
    pub fn adjust(&mut self, elapsed_ms: Option<f64>) {
        let Some(elapsed) = elapsed_ms.filter(|e| e.is_finite() && *e != 0.0) else {
            return;
        };
        let error = DESIRED_MS_PER_FRAME - elapsed;
        let full = self.full_width as f64 * self.full_height as f64;
        self.pixels_per_frame = clamp(self.pixels_per_frame + STRENGTH * error, MIN_PIXELS_PER_FRAME, full);
        self.calc_dimensions();
    }

    fn calc_dimensions(&mut self) {
        let (fw, fh) = (self.full_width as f64, self.full_height as f64);
        let aspect = fw / fh;
        let w = clamp((self.pixels_per_frame * aspect).sqrt(), 1.0, fw).round();
        let h = clamp(w / aspect, 1.0, fh).round();
        self.width = w as u32;
        self.height = h as u32;
        self.scale = [(w / fw) as f32, (h / fh) as f32];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_by_texture_limit() {
        assert_eq!(pixels_per_frame_estimate(4096), 80_000.0);
        assert_eq!(pixels_per_frame_estimate(8192), 80_000.0);
        assert_eq!(pixels_per_frame_estimate(16384), 150_000.0);
        assert_eq!(pixels_per_frame_estimate(32768), 400_000.0);
    }

    #[test]
    fn test_dimensions_keep_aspect() {
        let mut s = RenderSize::new(8192);
        s.set_size(1600, 800);
        // sqrt(80000 * 2) = 400
        assert_eq!((s.width(), s.height()), (400, 200));
        assert_eq!(s.scale(), [0.25, 0.25]);
    }

    #[test]
    fn test_small_screen_renders_full() {
        let mut s = RenderSize::new(8192);
        s.set_size(64, 32);
        assert_eq!((s.width(), s.height()), (64, 32));
        assert_eq!(s.scale(), [1.0, 1.0]);
    }

    #[test]
    fn test_budget_stays_in_range() {
        let mut s = RenderSize::new(8192);
        s.set_size(1920, 1080);
        for elapsed in [1e9, -1e9, 0.5, 1e6, 3.0] {
            s.adjust(Some(elapsed));
            let ppf = s.pixels_per_frame();
            assert!((MIN_PIXELS_PER_FRAME..=1920.0 * 1080.0).contains(&ppf), "{ppf}");
            assert!(s.width() >= 1 && s.width() <= 1920);
            assert!(s.height() >= 1 && s.height() <= 1080);
        }
    }

    #[test]
    fn test_adjust_ignores_unknown() {
        let mut s = RenderSize::new(8192);
        s.set_size(1920, 1080);
        let before = s.pixels_per_frame();
        s.adjust(None);
        s.adjust(Some(0.0));
        s.adjust(Some(f64::NAN));
        assert_eq!(s.pixels_per_frame(), before);
        s.adjust(Some(30.0));
        assert_eq!(s.pixels_per_frame(), before - 6000.0);
    }
}
