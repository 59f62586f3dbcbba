//! Interactive sessions driven through the frame scheduler with a host clock.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rt_renderer::renderer::{FramePlan, FrameScheduler, FrameTimer, LightRef, RenderState, Step};
use rt_renderer::scene::Camera;

fn scheduler(w: u32, h: u32) -> FrameScheduler {
    let mut s = FrameScheduler::with_rng(8192, StdRng::seed_from_u64(11));
    s.set_size(w, h);
    s
}

fn orbit(angle: f32) -> Camera {
    let eye = Vec3::new(angle.sin() * 6.0, 2.0, angle.cos() * 6.0);
    Camera::new(45.0, 16.0 / 9.0, 0.1, 500.0).look_at(eye, Vec3::ZERO, Vec3::Y)
}

fn tone_maps(plan: &FramePlan) -> Vec<(LightRef, [f32; 2])> {
    plan.steps
        .iter()
        .filter_map(|s| match s {
            Step::ToneMap { light, light_scale, .. } => Some((*light, *light_scale)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_slow_previews_shrink_resolution() {
    let mut s = scheduler(800, 600);
    let mut timer = FrameTimer::new();
    let mut widths = Vec::new();

    for frame in 0..12 {
        timer.sync(frame as f64 * 40.0);
        s.time(timer.tick());
        let plan = s.draw(&orbit(frame as f32 * 0.1));
        if frame == 0 {
            assert_eq!(s.state(), RenderState::FirstFrame);
            assert!(tone_maps(&plan).is_empty());
            continue;
        }
        assert_eq!(s.state(), RenderState::Preview);
        let maps = tone_maps(&plan);
        assert_eq!(maps.len(), 1);
        let scale = maps[0].1;
        assert!(scale[0] < 1.0 && scale[1] < 1.0);

        let viewport = plan.steps.iter().find_map(|st| match st {
            Step::RayTrace { viewport, scissor: None, additive: false, .. } => Some(*viewport),
            _ => None,
        });
        assert_eq!(viewport, Some((s.preview_size().width(), s.preview_size().height())));
        widths.push(s.preview_size().width());
    }

    assert!(widths.windows(2).all(|w| w[1] <= w[0]), "{widths:?}");
    assert!(widths.last() < widths.first());
}

#[test]
fn test_settled_camera_accumulates_after_preview() {
    let mut s = scheduler(320, 180);
    let mut samples = Vec::new();

    for frame in 0..5 {
        s.draw(&orbit(frame as f32 * 0.2));
    }
    let still = orbit(1.0);
    for _ in 0..6 {
        for step in s.draw(&still).steps {
            if let Step::SampleRendered { samples: n, .. } = step {
                samples.push(n);
            }
        }
    }

    // The first still frame is a preview, then every draw is a full sample
    assert_eq!(s.total_samples_rendered(), 5);
    assert_eq!(samples, [1, 2, 3, 4]);
    assert_eq!(s.state(), RenderState::Accumulating);
}

#[test]
fn test_tiles_cover_frame_once_per_sample() {
    let (w, h) = (1920u32, 1080u32);
    let mut s = scheduler(w, h);
    let cam = orbit(0.0);
    s.draw(&cam);

    let mut covered = vec![0u8; (w * h) as usize];
    for _ in 0..s.tiles().num_tiles() {
        for step in s.draw(&cam).steps {
            if let Step::RayTrace { scissor: Some(tile), .. } = step {
                let (x, y, tw, th) = tile.clip(w, h).unwrap();
                for row in y..y + th {
                    for col in x..x + tw {
                        covered[(row * w + col) as usize] += 1;
                    }
                }
            }
        }
    }
    assert!(covered.iter().all(|&c| c == 1));
    assert_eq!(s.total_samples_rendered(), 1);
}

#[test]
fn test_resize_restarts_session() {
    let mut s = scheduler(64, 64);
    let cam = orbit(0.0);
    for _ in 0..5 {
        s.draw(&cam);
    }
    assert_eq!(s.total_samples_rendered(), 4);

    s.set_size(128, 96);
    let plan = s.draw(&cam);
    assert_eq!(s.state(), RenderState::FirstFrame);
    assert!(tone_maps(&plan).is_empty());
    s.draw(&cam);
    assert_eq!(s.total_samples_rendered(), 1);
}

#[test]
fn test_reprojection_never_reads_its_target() {
    let mut s = scheduler(400, 300);

    // Alternate bursts of motion and stillness, with some full draws mixed in
    for frame in 0..120u32 {
        let moving = (frame / 7) % 2 == 0;
        let cam = orbit(if moving { frame as f32 * 0.05 } else { 0.0 });
        let plan = if frame % 13 == 0 { s.draw_full(&cam) } else { s.draw(&cam) };

        for step in &plan.steps {
            if let Step::Reproject { target, light, previous_light, gbuffer, previous_gbuffer, .. } = step {
                assert_ne!(*light, LightRef::Reproject(*target), "frame {frame}");
                assert_ne!(*previous_light, LightRef::Reproject(*target), "frame {frame}");
                assert_ne!(gbuffer, previous_gbuffer, "frame {frame}");
            }
        }
    }
}
