//! Environment lighting: baking lights into an equirectangular radiance
//! image and building the 2D CDF used to importance sample it.
//!
//! Equirectangular convention shared with the shaders: texel column `x` maps
//! to azimuth `phi = 2π·u` measured from +X towards +Z, row `y` maps to polar
//! angle `theta = π·v` measured from +Y.

use glam::Vec3;
use half::f16;
use rayon::prelude::*;
use std::f32::consts::PI;

use crate::scene::{AmbientLight, Background, DirectionalLight, EnvEncoding, EnvironmentLight, EnvironmentMap};

/// Size of the radiance image when the scene has no environment map.
pub const DEFAULT_ENV_WIDTH: u32 = 64;
pub const DEFAULT_ENV_HEIGHT: u32 = 32;

/// Falloff below which a directional light stops contributing.
const FALLOFF_CUTOFF: f32 = 1e-4;

/// Linear RGBA float image.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl EnvImage {
    pub fn black(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0.0; width as usize * height as usize * 4] }
    }

    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let i = 4 * (y as usize * self.width as usize + x as usize);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    fn add_rgb(&mut self, index: usize, rgb: Vec3) {
        self.data[4 * index] += rgb.x;
        self.data[4 * index + 1] += rgb.y;
        self.data[4 * index + 2] += rgb.z;
    }

    /// Texel data as half floats for an `Rgba16Float` texture.
    pub fn to_f16(&self) -> Vec<f16> {
        self.data.iter().map(|&v| f16::from_f32(v)).collect()
    }
}

/// Decode any HDR map into linear RGBA radiance.
pub fn decode_env_map(map: &EnvironmentMap) -> EnvImage {
    let data = match map.encoding {
        EnvEncoding::Linear => map.data.clone(),
        EnvEncoding::Rgbe => map
            .data
            .chunks_exact(4)
            .flat_map(|t| {
                let scale = 2f32.powf(t[3] - 128.0) / 255.0;
                [t[0] * scale, t[1] * scale, t[2] * scale, 1.0]
            })
            .collect(),
        EnvEncoding::Srgb => map
            .data
            .chunks_exact(4)
            .flat_map(|t| [srgb_to_linear(t[0]), srgb_to_linear(t[1]), srgb_to_linear(t[2]), 1.0])
            .collect(),
    };
    EnvImage { width: map.width, height: map.height, data }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Unit direction through the centre of texel `(x, y)`.
pub fn texel_direction(x: u32, y: u32, width: u32, height: u32) -> Vec3 {
    let phi = 2.0 * PI * (x as f32 + 0.5) / width as f32;
    let theta = PI * (y as f32 + 0.5) / height as f32;
    Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin())
}

/// Equirectangular coordinates of a direction, both in `[0, 1]`.
pub fn direction_to_uv(dir: Vec3) -> [f32; 2] {
    let d = dir.normalize_or_zero();
    let phi = d.z.atan2(d.x).rem_euclid(2.0 * PI);
    let theta = d.y.clamp(-1.0, 1.0).acos();
    [phi / (2.0 * PI), theta / PI]
}

/// Angular falloff of a soft directional light.
///
/// `softness` 0 concentrates the light into a few texels; 1 spreads it
/// across the sphere.
pub fn falloff_at_angle(angle: f32, softness: f32) -> f32 {
    let coef = 2f32.powf(14.5 * (1.0 - softness.clamp(0.0, 1.0)).max(0.001));
    coef.powf(1.1) * 8f32.powf(-coef * angle.powf(1.8))
}

/// Angle past which the falloff is negligible.
fn falloff_threshold(softness: f32) -> f32 {
    let step = PI / 128.0;
    (0..256)
        .map(|i| i as f32 * step)
        .find(|&angle| falloff_at_angle(angle, softness) <= FALLOFF_CUTOFF)
        .unwrap_or(PI)
}

/// Solid angle covered by a texel in row `y`.
fn texel_solid_angle(y: u32, width: u32, height: u32) -> f32 {
    let theta = PI * (y as f32 + 0.5) / height as f32;
    (2.0 * PI / width as f32) * (PI / height as f32) * theta.sin()
}

/// Splat a directional light around its direction.
///
/// Weights follow [`falloff_at_angle`] and are normalized so the splat
/// delivers `color * intensity` irradiance to a surface facing the light,
/// independent of image resolution. A light narrower than one texel lands
/// entirely in the texel containing its direction.
fn add_directional_light(image: &mut EnvImage, light: &DirectionalLight) {
    let dir = light.direction.normalize_or_zero();
    if dir == Vec3::ZERO {
        return;
    }
    let (w, h) = (image.width, image.height);
    let softness = light.softness();
    let cos_threshold = falloff_threshold(softness).cos();

    let mut weights: Vec<(u32, u32, f32)> = (0..h)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..w).filter_map(move |x| {
                let cos = texel_direction(x, y, w, h).dot(dir).clamp(-1.0, 1.0);
                if cos < cos_threshold {
                    return None;
                }
                let falloff = falloff_at_angle(cos.acos(), softness);
                (falloff > 0.0).then_some((x, y, falloff))
            })
        })
        .collect();
    if weights.is_empty() {
        let [u, v] = direction_to_uv(dir);
        let x = ((u * w as f32) as u32).min(w - 1);
        let y = ((v * h as f32) as u32).min(h - 1);
        weights.push((x, y, 1.0));
    }

    let total: f32 = weights.iter().map(|&(_, y, wt)| wt * texel_solid_angle(y, w, h)).sum();
    if total <= 0.0 {
        return;
    }
    let color = light.color * light.intensity / total;
    for (x, y, wt) in weights {
        image.add_rgb((y * w + x) as usize, color * wt);
    }
}

/// Rasterize environment, ambient and directional lights into one radiance image.
#[tracing::instrument(skip_all, fields(directional = directional.len(), ambient = ambient.len()))]
pub fn bake_environment(
    directional: &[DirectionalLight],
    ambient: &[AmbientLight],
    environment: Option<&EnvironmentLight>,
) -> EnvImage {
    let mut image = match environment.and_then(|e| e.map.as_ref().map(|m| (e, m))) {
        Some((light, map)) => {
            let mut image = decode_env_map(map);
            let tint = light.color * light.intensity;
            for t in image.data.chunks_exact_mut(4) {
                t[0] *= tint.x;
                t[1] *= tint.y;
                t[2] *= tint.z;
            }
            image
        }
        None => EnvImage::black(DEFAULT_ENV_WIDTH, DEFAULT_ENV_HEIGHT),
    };

    for light in ambient {
        let rgb = light.color * light.intensity;
        for i in 0..(image.width * image.height) as usize {
            image.add_rgb(i, rgb);
        }
    }

    for light in directional {
        add_directional_light(&mut image, light);
    }

    image
}

/// Image shown behind the scene.
pub fn background_image(background: &Background) -> EnvImage {
    match background {
        Background::Color(c) => EnvImage { width: 1, height: 1, data: vec![c.x, c.y, c.z, 1.0] },
        Background::Image(map) => decode_env_map(map),
    }
}

/// Piecewise-constant 2D distribution over an [`EnvImage`].
///
/// Two channels per texel, `(W + 2) × (H + 1)` texels:
/// - column 0: marginal CDF over rows (x), row integral (y)
/// - columns 1..=W+1 of row `r`: conditional CDF of that row (x), and in
///   columns 1..=W the normalized pdf of each texel (y)
///
/// Both CDFs start at 0 and end at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvDistribution {
    pub width: u32,
    pub height: u32,
    pub data: Vec<[f32; 2]>,
}

impl EnvDistribution {
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [f32; 2] {
        self.data[(y * self.width + x) as usize]
    }

    #[inline]
    fn get_mut(&mut self, x: u32, y: u32) -> &mut [f32; 2] {
        &mut self.data[(y * self.width + x) as usize]
    }

    /// Final value of the marginal CDF.
    pub fn marginal_total(&self) -> f32 {
        self.get(0, self.height - 1)[0]
    }
}

/// Build the importance sampling distribution for `image`.
///
/// Luminance is weighted by `sin(theta)` to undo the area stretch of the
/// equirectangular projection near the poles.
#[tracing::instrument(skip_all, fields(width = image.width, height = image.height))]
pub fn env_distribution(image: &EnvImage) -> EnvDistribution {
    let (w, h) = (image.width, image.height);
    let mut cdf = EnvDistribution { width: w + 2, height: h + 1, data: vec![[0.0; 2]; ((w + 2) * (h + 1)) as usize] };

    for y in 0..h {
        let sin_theta = (PI * (y as f32 + 0.5) / h as f32).sin();
        for x in 0..w {
            let [r, g, b, _] = image.texel(x, y);
            let luminance = (0.2126 * r + 0.7152 * g + 0.0722 * b) * sin_theta;
            let prev = cdf.get(x + 1, y)[0];
            cdf.get_mut(x + 2, y)[0] = prev + luminance / w as f32;
            cdf.get_mut(x + 1, y)[1] = luminance;
        }

        let row_integral = cdf.get(w + 1, y)[0];
        if row_integral > 0.0 && row_integral.is_finite() {
            for x in 1..w + 2 {
                let t = cdf.get_mut(x, y);
                t[0] /= row_integral;
                t[1] /= row_integral;
            }
        } else {
            // Black row: sample uniformly
            for x in 1..w + 2 {
                let t = cdf.get_mut(x, y);
                t[0] = (x - 1) as f32 / w as f32;
                t[1] = if x <= w { 1.0 } else { 0.0 };
            }
        }

        let marginal = cdf.get(0, y)[0];
        cdf.get_mut(0, y + 1)[0] = marginal + row_integral.max(0.0) / h as f32;
        cdf.get_mut(0, y)[1] = row_integral.max(0.0);
    }

    let integral = cdf.get(0, h)[0];
    if integral > 0.0 && integral.is_finite() {
        for y in 0..h + 1 {
            let t = cdf.get_mut(0, y);
            t[0] /= integral;
            t[1] /= integral;
        }
    } else {
        for y in 0..h + 1 {
            *cdf.get_mut(0, y) = [y as f32 / h as f32, if y < h { 1.0 } else { 0.0 }];
        }
    }

    cdf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn gradient_image(w: u32, h: u32) -> EnvImage {
        let mut img = EnvImage::black(w, h);
        for y in 0..h {
            for x in 0..w {
                let i = 4 * (y * w + x) as usize;
                img.data[i] = (x as f32 * 0.37 + y as f32).sin().abs() * 10.0;
                img.data[i + 1] = x as f32 / w as f32;
                img.data[i + 2] = 0.5;
            }
        }
        img
    }

    #[test]
    fn test_marginal_ends_at_one() {
        for (w, h) in [(64, 32), (17, 9), (1, 1)] {
            let cdf = env_distribution(&gradient_image(w, h));
            assert_eq!(cdf.width, w + 2);
            assert_eq!(cdf.height, h + 1);
            assert!((cdf.marginal_total() - 1.0).abs() < 1e-5, "{w}x{h}");
        }
    }

    #[test]
    fn test_row_cdfs_monotonic_and_normalized() {
        let img = gradient_image(40, 20);
        let cdf = env_distribution(&img);
        for y in 0..img.height {
            let mut prev = cdf.get(1, y)[0];
            assert_eq!(prev, 0.0);
            for x in 2..cdf.width {
                let v = cdf.get(x, y)[0];
                assert!(v >= prev, "row {y} not monotonic at {x}");
                prev = v;
            }
            assert!((prev - 1.0).abs() < 1e-5);
        }
        let mut prev = 0.0;
        for y in 0..cdf.height {
            let v = cdf.get(0, y)[0];
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn test_black_image_falls_back_to_uniform() {
        let cdf = env_distribution(&EnvImage::black(8, 4));
        assert!((cdf.marginal_total() - 1.0).abs() < 1e-6);
        assert!((cdf.get(5, 2)[0] - 0.5).abs() < 1e-6);
        assert!(cdf.data.iter().all(|t| t[0].is_finite() && t[1].is_finite()));
    }

    #[test]
    fn test_uv_roundtrip_at_texel_centres() {
        let (w, h) = (16, 8);
        for (x, y) in [(0, 0), (5, 3), (15, 7)] {
            let [u, v] = direction_to_uv(texel_direction(x, y, w, h));
            assert_eq!((u * w as f32) as u32, x);
            assert_eq!((v * h as f32) as u32, y);
        }
    }

    #[test]
    fn test_rgbe_decode() {
        let map = EnvironmentMap::new(1, 1, vec![128.0, 64.0, 0.0, 129.0], EnvEncoding::Rgbe).unwrap();
        let img = decode_env_map(&map);
        assert!((img.data[0] - 128.0 * 2.0 / 255.0).abs() < 1e-5);
        assert!((img.data[1] - 64.0 * 2.0 / 255.0).abs() < 1e-5);
    }

    #[test]
    fn test_bake_ambient_and_default_size() {
        let img = bake_environment(&[], &[AmbientLight { color: Vec3::new(1.0, 0.5, 0.0), intensity: 2.0 }], None);
        assert_eq!((img.width, img.height), (DEFAULT_ENV_WIDTH, DEFAULT_ENV_HEIGHT));
        assert_eq!(img.texel(10, 10), [2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_bake_directional_light_peaks_at_direction() {
        let sun = DirectionalLight::new(Vec3::ONE, 1.0, Vec3::Y);
        let img = bake_environment(&[sun], &[], None);
        let top = img.texel(0, 0)[0];
        let bottom = img.texel(0, DEFAULT_ENV_HEIGHT - 1)[0];
        assert!(top > 0.0);
        assert_eq!(bottom, 0.0);
    }

    #[test]
    fn test_directional_light_energy_independent_of_size() {
        let sun = DirectionalLight { softness: Some(0.4), ..DirectionalLight::new(Vec3::ONE, 2.0, Vec3::new(1.0, 1.0, 0.0)) };
        for (w, h) in [(64, 32), (256, 128)] {
            let mut img = EnvImage::black(w, h);
            add_directional_light(&mut img, &sun);
            let energy: f32 = (0..h)
                .flat_map(|y| (0..w).map(move |x| (x, y)))
                .map(|(x, y)| img.texel(x, y)[0] * texel_solid_angle(y, w, h))
                .sum();
            assert!((energy - 2.0).abs() < 1e-3, "{w}x{h}: {energy}");
        }
    }

    #[test]
    fn test_softness_widens_falloff() {
        let hard = falloff_threshold(0.0);
        let soft = falloff_threshold(0.8);
        assert!(soft > hard);
        assert!(falloff_at_angle(0.0, 0.5) > falloff_at_angle(0.3, 0.5));
    }

    #[test]
    fn test_env_light_tinted() {
        let map = Arc::new(EnvironmentMap::new(2, 1, vec![1.0; 8], EnvEncoding::Linear).unwrap());
        let light = EnvironmentLight { map: Some(map), color: Vec3::new(1.0, 0.0, 0.0), intensity: 3.0 };
        let img = bake_environment(&[], &[], Some(&light));
        assert_eq!((img.width, img.height), (2, 1));
        assert_eq!(img.texel(1, 0)[..3], [3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_background_color() {
        let img = background_image(&Background::Color(Vec3::new(0.1, 0.2, 0.3)));
        assert_eq!((img.width, img.height), (1, 1));
        assert_eq!(img.data, vec![0.1, 0.2, 0.3, 1.0]);
    }
}
