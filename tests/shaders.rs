//! Every render program parses and validates under naga for the define
//! combinations scenes produce.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use rt_renderer::config::{ToneMapping, MAX_BOUNCES, MIN_BOUNCES};
use rt_renderer::gpu::{Defines, ShaderProgram};
use rt_renderer::pathtracer::{build_bvh, flatten_bvh, merge_meshes, pack_materials, FlatBvh, MergedGeometry, PackedMaterials};
use rt_renderer::renderer::passes::{
    gbuffer_program, ray_trace_defines, ray_trace_program, reproject_program, tone_map_program,
};
use rt_renderer::scene::{Geometry, Material, MeshInstance, TextureImage};

fn tex(size: u32) -> Arc<TextureImage> {
    Arc::new(TextureImage::solid(size, size, [200, 128, 64, 255]))
}

fn build(materials: Vec<Material>) -> (MergedGeometry, FlatBvh, PackedMaterials) {
    let meshes: Vec<MeshInstance> = materials
        .into_iter()
        .enumerate()
        .map(|(i, material)| MeshInstance {
            name: format!("mesh{i}"),
            geometry: Arc::new(Geometry::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5))),
            material: Arc::new(material),
            world: Mat4::from_translation(Vec3::new(i as f32 * 2.0, 0.0, 0.0)),
            visible: true,
        })
        .collect();
    let geometry = merge_meshes(&meshes);
    let prims = geometry.primitives();
    let flat = flatten_bvh(&build_bvh(&prims), &prims);
    let packed = pack_materials(&geometry.materials);
    (geometry, flat, packed)
}

fn textured() -> Material {
    Material {
        map: Some(tex(16)),
        normal_map: Some(tex(8)),
        roughness_map: Some(tex(4)),
        metalness_map: Some(tex(4)),
        ..Default::default()
    }
}

fn trace_program(materials: Vec<Material>, bounces: u32) -> ShaderProgram {
    let (geometry, flat, packed) = build(materials);
    let program = ray_trace_program(&ray_trace_defines(&geometry, &flat, &packed, bounces)).unwrap();
    let stack = program.constant_u32("STACK_SIZE").unwrap();
    flat.verify_stack(stack).unwrap();
    program
}

#[test]
fn test_gbuffer_plain_and_textured() {
    for materials in [vec![Material::default()], vec![textured(), Material::default()]] {
        let (_, _, packed) = build(materials);
        let program = gbuffer_program(&packed.defines()).unwrap();
        assert!(program.uniform_block("materials").is_some());
        assert!(program.uniform_block("params").unwrap().member("proj_view").is_some());
    }
}

#[test]
fn test_ray_trace_every_bounce_count() {
    for bounces in MIN_BOUNCES..=MAX_BOUNCES {
        let program = trace_program(vec![Material::default()], bounces);
        assert_eq!(program.constant_u32("BOUNCES"), Some(bounces));
    }
}

#[test]
fn test_ray_trace_material_kinds() {
    let glass = Material { transparent: true, ..Default::default() };
    let solid_glass = Material { transparent: true, solid: true, ..Default::default() };
    let catcher = Material { shadow_catcher: true, ..Default::default() };
    trace_program(vec![glass, solid_glass, catcher, textured()], 3);
}

#[test]
fn test_ray_trace_empty_scene() {
    let program = trace_program(Vec::new(), 2);
    assert_eq!(program.constant_u32("NUM_TRIS"), Some(0));
    assert_eq!(program.constant_u32("NUM_MATERIALS"), Some(1));
}

#[test]
fn test_ray_trace_uniforms_reflected() {
    let program = trace_program(vec![Material::default()], 2);
    let params = program.uniform_block("params").unwrap();
    for name in ["camera.transform", "camera.aspect", "camera.fov", "jitter", "pixel_size", "strata_size", "stratified_samples"] {
        assert!(params.member(name).is_some(), "missing {name}");
    }
    let samples = params.member("stratified_samples").unwrap();
    assert_eq!(samples.components, 4);
    assert_eq!(samples.array_stride, 16);
}

#[test]
fn test_reproject() {
    let program = reproject_program(&Defines::new()).unwrap();
    let params = program.uniform_block("params").unwrap();
    for name in ["history_camera", "light_scale", "previous_light_scale", "jitter", "blend_amount"] {
        assert!(params.member(name).is_some(), "missing {name}");
    }
}

#[test]
fn test_tone_map_every_curve() {
    let curves = [
        ToneMapping::Linear,
        ToneMapping::Reinhard,
        ToneMapping::Uncharted2,
        ToneMapping::Cineon,
        ToneMapping::AcesFilmic,
    ];
    for curve in curves {
        let defines = Defines::new().with("TONE_MAPPING", curve.shader_id());
        tone_map_program(&defines).unwrap();
        tone_map_program(&defines.with("EDGE_PRESERVING_UPSCALE", true)).unwrap();
    }
}
