//! Small numeric helpers shared by the CPU side of the pipeline.

use rand::Rng;

/// Clamp `x` into `[min, max]`.
#[inline]
pub fn clamp(x: f64, min: f64, max: f64) -> f64 {
    x.max(min).min(max)
}

/// Element-wise comparison with an absolute tolerance.
///
/// Slices of different length never compare equal.
pub fn arrays_approx_equal(a: &[f32], b: &[f32], eps: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= eps)
}

/// In-place Fisher-Yates shuffle.
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Layout of a linear array packed into a power-of-two-wide 2D data texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDimensions {
    /// log2 of `columns`, handed to shaders so they can index with shifts
    pub columns_log: u32,
    pub columns: u32,
    pub rows: u32,
}

impl TextureDimensions {
    /// Square-ish layout for `count` texels.
    pub fn from_count(count: usize) -> Self {
        let count = count.max(1);
        let columns_log = (count as f64).sqrt().log2().round().max(0.0) as u32;
        let columns = 1u32 << columns_log;
        let rows = (count as u32).div_ceil(columns);
        Self { columns_log, columns, rows }
    }

    /// Total texel capacity (`columns * rows`).
    pub fn size(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5.0, 0.0, 1.0), 1.0);
        assert_eq!(clamp(-5.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp(0.25, 0.0, 1.0), 0.25);
    }

    #[test]
    fn test_arrays_approx_equal() {
        assert!(arrays_approx_equal(&[1.0, 2.0], &[1.00005, 2.0], 1e-4));
        assert!(!arrays_approx_equal(&[1.0, 2.0], &[1.001, 2.0], 1e-4));
        assert!(!arrays_approx_equal(&[1.0], &[1.0, 2.0], 1e-4));
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut v: Vec<u32> = (0..100).collect();
        shuffle(&mut v, &mut rng);
        let mut sorted = v.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_texture_dimensions() {
        let d = TextureDimensions::from_count(1000);
        assert_eq!(d.columns, 32);
        assert_eq!(d.columns, 1 << d.columns_log);
        assert!(d.size() >= 1000);

        let d = TextureDimensions::from_count(1);
        assert_eq!(d.columns, 1);
        assert_eq!(d.rows, 1);

        let d = TextureDimensions::from_count(5);
        assert_eq!(d.columns, 2);
        assert_eq!(d.rows, 3);
    }
}
