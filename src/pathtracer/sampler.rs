//! Stratified random numbers for the per-pixel Monte-Carlo estimator.
//!
//! Drawing independent uniform numbers clusters samples by coincidence. A
//! stratified sampler splits `[0, 1)` into `strata_count` equal partitions per
//! dimension and visits every combination of partitions once, in shuffled
//! order, before repeating. Each value is returned in `[0, strata_count)`:
//! the integer part is the stratum and the fraction is uniform jitter inside
//! it. Shaders divide by the strata count.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::util::shuffle;

/// Sampler over `strata_count ^ dimensions` strata.
#[derive(Debug, Clone)]
pub struct StratifiedSampler {
    strata_count: u32,
    dimensions: usize,
    strata: Vec<u32>,
    index: usize,
    sample: Vec<f32>,
    rng: StdRng,
}

impl StratifiedSampler {
    pub fn new(strata_count: u32, dimensions: usize) -> Self {
        Self::with_rng(strata_count, dimensions, StdRng::from_entropy())
    }

    pub fn with_rng(strata_count: u32, dimensions: usize, rng: StdRng) -> Self {
        let strata_count = strata_count.max(1);
        let len = (strata_count as usize).pow(dimensions as u32);
        let strata: Vec<u32> = (0..len as u32).collect();
        Self {
            strata_count,
            dimensions,
            index: strata.len(),
            strata,
            sample: vec![0.0; dimensions],
            rng,
        }
    }

    pub fn strata_count(&self) -> u32 {
        self.strata_count
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of draws in one full cycle.
    pub fn cycle_len(&self) -> usize {
        self.strata.len()
    }

    /// Begin a new cycle over the current permutation without reshuffling.
    pub fn restart(&mut self) {
        self.index = 0;
    }

    /// Next stratum id, reshuffling once the permutation is exhausted.
    pub fn next_stratum(&mut self) -> u32 {
        if self.index >= self.strata.len() {
            shuffle(&mut self.strata, &mut self.rng);
            self.restart();
        }
        let stratum = self.strata[self.index];
        self.index += 1;
        stratum
    }

    /// Draw one jittered sample; one value per dimension in `[0, strata_count)`.
    pub fn next(&mut self) -> &[f32] {
        let mut stratum = self.next_stratum();
        for i in 0..self.dimensions {
            let jitter: f32 = self.rng.gen();
            self.sample[i] = (stratum % self.strata_count) as f32 + jitter;
            stratum /= self.strata_count;
        }
        &self.sample
    }
}

/// Several independent samplers drawn together into one flat sample.
///
/// Used to give each path-tracing decision (lens, light, BRDF, roulette) its
/// own stratification instead of one huge high-dimensional grid.
#[derive(Debug, Clone)]
pub struct StratifiedSamplerCombined {
    samplers: Vec<StratifiedSampler>,
    combined: Vec<f32>,
    strata_count: u32,
}

impl StratifiedSamplerCombined {
    pub fn new(strata_count: u32, dimensions: &[usize]) -> Self {
        let samplers: Vec<StratifiedSampler> =
            dimensions.iter().map(|&d| StratifiedSampler::new(strata_count, d)).collect();
        let total = dimensions.iter().sum();
        Self { samplers, combined: vec![0.0; total], strata_count: strata_count.max(1) }
    }

    pub fn strata_count(&self) -> u32 {
        self.strata_count
    }

    /// Total dimensions across all samplers.
    pub fn dimensions(&self) -> usize {
        self.combined.len()
    }

    pub fn restart(&mut self) {
        for s in &mut self.samplers {
            s.restart();
        }
    }

    pub fn next(&mut self) -> &[f32] {
        let mut offset = 0;
        for sampler in &mut self.samplers {
            let sample = sampler.next();
            self.combined[offset..offset + sample.len()].copy_from_slice(sample);
            offset += sample.len();
        }
        &self.combined
    }
}

/// Sampling dimensions consumed per path for a given bounce count.
///
/// Every bounce draws 2D samples for the BRDF lobe choice, light importance
/// sampling and the next direction; bounces after the first add one for
/// russian roulette.
pub fn sampling_dimensions(bounces: u32) -> Vec<usize> {
    let mut dims = Vec::new();
    for i in 1..=bounces {
        dims.extend_from_slice(&[2, 2, 2]);
        if i >= 2 {
            dims.push(1);
        }
    }
    dims
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seeded(strata: u32, dims: usize) -> StratifiedSampler {
        StratifiedSampler::with_rng(strata, dims, StdRng::seed_from_u64(42))
    }

    #[test]
    fn test_full_cycle_visits_every_stratum_once() {
        let mut s = seeded(4, 2);
        let n = s.cycle_len();
        assert_eq!(n, 16);
        let seen: HashSet<u32> = (0..n).map(|_| s.next_stratum()).collect();
        assert_eq!(seen.len(), n);
    }

    #[test]
    fn test_samples_in_range_and_match_stratum() {
        let mut s = seeded(6, 3);
        let mut cells = HashSet::new();
        for _ in 0..s.cycle_len() {
            let sample = s.next().to_vec();
            assert_eq!(sample.len(), 3);
            for v in &sample {
                assert!(*v >= 0.0 && *v < 6.0);
            }
            let cell: Vec<u32> = sample.iter().map(|v| v.floor() as u32).collect();
            cells.insert(cell);
        }
        assert_eq!(cells.len(), 216);
    }

    #[test]
    fn test_restart_replays_permutation() {
        let mut s = seeded(3, 2);
        let first: Vec<u32> = (0..s.cycle_len()).map(|_| s.next_stratum()).collect();
        s.restart();
        let replay: Vec<u32> = (0..s.cycle_len()).map(|_| s.next_stratum()).collect();
        assert_eq!(first, replay);
    }

    #[test]
    fn test_restart_mid_cycle_discards_remaining() {
        let mut s = seeded(3, 1);
        let a = s.next_stratum();
        let _ = s.next_stratum();
        s.restart();
        assert_eq!(s.next_stratum(), a);
    }

    #[test]
    fn test_single_stratum() {
        let mut s = seeded(1, 4);
        for _ in 0..5 {
            assert!(s.next().iter().all(|v| *v >= 0.0 && *v < 1.0));
        }
    }

    #[test]
    fn test_combined_concatenates() {
        let dims = sampling_dimensions(2);
        assert_eq!(dims, vec![2, 2, 2, 2, 2, 2, 1]);
        let mut c = StratifiedSamplerCombined::new(6, &dims);
        assert_eq!(c.dimensions(), 13);
        let sample = c.next();
        assert_eq!(sample.len(), 13);
        assert!(sample.iter().all(|v| *v >= 0.0 && *v < 6.0));
    }

    #[test]
    fn test_sampling_dimensions_per_bounce() {
        assert_eq!(sampling_dimensions(1).iter().sum::<usize>(), 6);
        assert_eq!(sampling_dimensions(3).iter().sum::<usize>(), 20);
    }
}
