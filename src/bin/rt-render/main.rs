//! rt-render - Headless demo: path trace a built-in scene and save a PNG.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use glam::{Mat4, Vec3};
use rt_renderer::gpu::read_rgba8;
use rt_renderer::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Verbosity selected by `-q`, `-v` and `-vv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Verbosity {
    Quiet,
    Info,
    Debug,
    Trace,
}

#[derive(Debug)]
struct Args {
    verbosity: Verbosity,
    config: Option<PathBuf>,
    hdr: Option<PathBuf>,
    output: PathBuf,
    frames: u32,
    width: u32,
    height: u32,
    bounces: Option<u32>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Info,
            config: None,
            hdr: None,
            output: PathBuf::from("render.png"),
            frames: 64,
            width: 640,
            height: 360,
            bounces: None,
        }
    }
}

fn print_help() {
    println!("rt-render - progressive GPU path tracer demo");
    println!();
    println!("USAGE: rt-render [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -o, --output <file.png>   Output image (default render.png)");
    println!("  -n, --frames <N>          Frames to render (default 64)");
    println!("  -s, --size <WxH>          Image size (default 640x360)");
    println!("  -b, --bounces <N>         Global illumination bounces, 1..=6");
    println!("      --hdr <file.hdr>      Environment map");
    println!("      --config <file.json>  Renderer options");
    println!("  -v, -vv                   Debug / trace logging");
    println!("  -q                        Errors only");
    println!("  -h, --help                This help");
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = Args::default();
    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| it.next().with_context(|| format!("{name} needs a value"));
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-q" | "--quiet" => args.verbosity = Verbosity::Quiet,
            "-v" | "--verbose" => args.verbosity = Verbosity::Debug,
            "-vv" | "--trace" => args.verbosity = Verbosity::Trace,
            "-o" | "--output" => args.output = value("--output")?.into(),
            "-n" | "--frames" => args.frames = value("--frames")?.parse().context("--frames")?,
            "-b" | "--bounces" => args.bounces = Some(value("--bounces")?.parse().context("--bounces")?),
            "--hdr" => args.hdr = Some(value("--hdr")?.into()),
            "--config" => args.config = Some(value("--config")?.into()),
            "-s" | "--size" => {
                let size = value("--size")?;
                let (w, h) = size.split_once('x').with_context(|| format!("size '{size}' is not WxH"))?;
                args.width = w.parse().context("--size width")?;
                args.height = h.parse().context("--size height")?;
            }
            other => bail!("unknown argument '{other}', see --help"),
        }
    }
    if args.width == 0 || args.height == 0 {
        bail!("image size must be non-zero");
    }
    Ok(Some(args))
}

fn init_logging(verbosity: Verbosity) {
    let (level, wgpu_level) = match verbosity {
        Verbosity::Quiet => ("error", log::LevelFilter::Error),
        Verbosity::Info => ("info", log::LevelFilter::Warn),
        Verbosity::Debug => ("debug", log::LevelFilter::Info),
        Verbosity::Trace => ("trace", log::LevelFilter::Debug),
    };

    // wgpu and naga log through the `log` facade
    env_logger::Builder::new().filter_level(wgpu_level).parse_default_env().init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rt_renderer={level},rt_render={level}")));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 8×8 checkerboard, used as the box's diffuse map.
fn checker(size: u32) -> TextureImage {
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let on = ((x * 8 / size) + (y * 8 / size)) % 2 == 0;
            data.extend_from_slice(if on { &[230, 230, 230, 255] } else { &[40, 90, 160, 255] });
        }
    }
    TextureImage { width: size, height: size, data }
}

fn build_scene(hdr: Option<&PathBuf>) -> Result<Scene> {
    let mut scene = Scene::new();

    let floor = Material { color: Vec3::splat(0.8), roughness: 0.9, ..Default::default() };
    scene.add(SceneNode::mesh("floor", Arc::new(Geometry::plane(20.0)), Arc::new(floor)));

    let crate_material = Material { map: Some(Arc::new(checker(256))), roughness: 0.5, ..Default::default() };
    scene.add(
        SceneNode::mesh("box", Arc::new(Geometry::cuboid(Vec3::splat(-1.0), Vec3::splat(1.0))), Arc::new(crate_material))
            .with_transform(Mat4::from_rotation_translation(
                glam::Quat::from_rotation_y(0.6),
                Vec3::new(0.0, 1.0, 0.0),
            )),
    );

    let mut sun = DirectionalLight::new(Vec3::new(1.0, 0.95, 0.85), 3.0, Vec3::new(0.5, 1.0, 0.3));
    sun.softness = Some(0.15);
    scene.add(SceneNode::new("sun", NodeKind::DirectionalLight(sun)));
    scene.add(SceneNode::new(
        "sky",
        NodeKind::AmbientLight(AmbientLight { color: Vec3::new(0.6, 0.7, 0.9), intensity: 0.3 }),
    ));

    if let Some(path) = hdr {
        let map = EnvironmentMap::load_hdr(path).with_context(|| format!("loading {}", path.display()))?;
        scene.add(SceneNode::new("environment", NodeKind::EnvironmentLight(EnvironmentLight::new(Arc::new(map)))));
    }
    Ok(scene)
}

fn run(args: Args) -> Result<()> {
    let mut options = match &args.config {
        Some(path) => RendererOptions::load(path).with_context(|| format!("reading {}", path.display()))?,
        None => RendererOptions::default(),
    };
    if let Some(b) = args.bounces {
        options.set_bounces(b);
    }

    let ctx = pollster::block_on(GpuContext::headless())?;
    info!(adapter = %ctx.adapter_name, "using adapter");

    let mut renderer = RayTracingRenderer::new(&ctx.device, &ctx.queue, ctx.device.features(), options)?;
    renderer.on_sample_rendered(|samples, elapsed| match elapsed {
        Some(ms) => tracing::debug!(samples, ms, "sample rendered"),
        None => tracing::debug!(samples, "sample rendered"),
    });

    let scene = build_scene(args.hdr.as_ref())?;
    let camera = Camera::new(45.0, args.width as f32 / args.height as f32, 0.1, 1000.0).look_at(
        Vec3::new(4.0, 3.0, 6.0),
        Vec3::new(0.0, 0.8, 0.0),
        Vec3::Y,
    );

    let target = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("output"),
        size: wgpu::Extent3d { width: args.width, height: args.height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    renderer.set_size(args.width, args.height);

    let start = Instant::now();
    for _ in 0..args.frames {
        renderer.sync(start.elapsed().as_secs_f64() * 1000.0);
        renderer.render(&scene, &camera, &target)?;
        // Wait so frame timings measure GPU work
        ctx.device.poll(wgpu::PollType::wait_indefinitely()).map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    let pixels = read_rgba8(&ctx.device, &ctx.queue, &target)?;
    let image = image::RgbaImage::from_raw(args.width, args.height, pixels).context("readback size mismatch")?;
    image.save(&args.output).with_context(|| format!("writing {}", args.output.display()))?;

    info!(
        frames = args.frames,
        samples = renderer.total_samples_rendered(),
        seconds = start.elapsed().as_secs_f64(),
        output = %args.output.display(),
        "done"
    );
    renderer.dispose();
    Ok(())
}

fn main() -> Result<()> {
    let Some(args) = parse_args()? else {
        print_help();
        return Ok(());
    };
    init_logging(args.verbosity);
    run(args)
}
