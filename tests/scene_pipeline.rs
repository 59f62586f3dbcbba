//! Scene tree to GPU-ready data: decomposition, merge, BVH, materials and
//! the environment distribution, checked end to end on the CPU.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use rt_renderer::gpu::DefineValue;
use rt_renderer::pathtracer::{
    bake_environment, build_bvh, env_distribution, flatten_bvh, merge_meshes, pack_materials, FlatBvh, MaterialKind,
    TEXELS_PER_RECORD,
};
use rt_renderer::scene::{
    decompose_scene, AmbientLight, DirectionalLight, EnvEncoding, EnvironmentLight, EnvironmentMap, Geometry,
    Material, MeshMaterial, NodeKind, Scene, SceneNode, TextureImage,
};

fn test_scene() -> Scene {
    let cube = Arc::new(Geometry::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5)));
    let shared = Arc::new(Material::default());
    let checker = Arc::new(TextureImage::solid(4, 4, [255, 0, 0, 255]));
    let textured = Arc::new(Material { map: Some(checker), ..Default::default() });
    let glass = Arc::new(Material { transparent: true, solid: true, ..Default::default() });

    let mut hidden = SceneNode::mesh("hidden", Arc::clone(&cube), Arc::clone(&shared));
    hidden.visible = false;

    let mut scene = Scene::new();
    scene.add(SceneNode::mesh("floor", Arc::new(Geometry::plane(10.0)), Arc::clone(&shared)));
    scene.add(
        SceneNode::group("stack")
            .with_transform(Mat4::from_rotation_translation(Quat::from_rotation_y(0.4), Vec3::Y))
            .with_child(SceneNode::mesh("a", Arc::clone(&cube), Arc::clone(&shared)))
            .with_child(
                SceneNode::mesh("b", Arc::clone(&cube), textured)
                    .with_transform(Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))),
            )
            .with_child(
                SceneNode::mesh("c", Arc::clone(&cube), glass)
                    .with_transform(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0))),
            )
            .with_child(hidden),
    );
    scene.add(SceneNode::new(
        "wire",
        NodeKind::Mesh { geometry: Some(cube), material: MeshMaterial::Unsupported("line".into()) },
    ));
    scene.add(SceneNode::new(
        "sun",
        NodeKind::DirectionalLight(DirectionalLight::new(Vec3::ONE, 2.0, Vec3::new(0.3, 1.0, 0.2))),
    ));
    scene.add(SceneNode::new("sky", NodeKind::AmbientLight(AmbientLight { color: Vec3::ONE, intensity: 0.1 })));
    scene
}

/// Triangle index triples reachable from the root of `flat`, with their material.
fn leaf_triangles(flat: &FlatBvh) -> Vec<([u32; 3], u32)> {
    let mut out = Vec::new();
    let mut pending = vec![0usize];
    while let Some(i) = pending.pop() {
        let head = flat.texels[i];
        let count = head[3] as i32;
        if count < 0 {
            for t in 0..(-count) as usize {
                let record = i + t * TEXELS_PER_RECORD;
                let [a, b, c, n] = flat.texels[record];
                assert_eq!(n as i32, count, "every triangle record carries the leaf size");
                out.push(([a, b, c], flat.texels[record + 1][3]));
            }
        } else {
            pending.push(i + TEXELS_PER_RECORD);
            pending.push(flat.texels[i + 1][3] as usize);
        }
    }
    out
}

#[test]
fn test_scene_to_bvh() {
    let description = decompose_scene(&test_scene());
    assert_eq!(description.meshes.len(), 5);
    assert_eq!(description.directional_lights.len(), 1);

    let geometry = merge_meshes(&description.meshes);
    // floor + three visible cubes
    assert_eq!(geometry.triangle_count(), 2 + 3 * 12);
    assert_eq!(geometry.materials.len(), 3);

    let prims = geometry.primitives();
    let bvh = build_bvh(&prims);
    let flat = flatten_bvh(&bvh, &prims);

    let n = prims.len();
    assert!(flat.record_count() <= 2 * n - 1);
    assert!(bvh.nodes.len() <= 2 * n - 1);
    flat.verify_stack(bvh.max_depth.max(1)).unwrap();

    let mut found = leaf_triangles(&flat);
    assert_eq!(found.len(), n);
    for (_, material) in &found {
        assert!((*material as usize) < geometry.materials.len());
    }
    let mut expected: Vec<[u32; 3]> = geometry.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();
    expected.sort_unstable();
    found.sort_unstable();
    assert_eq!(found.into_iter().map(|(t, _)| t).collect::<Vec<_>>(), expected);
}

#[test]
fn test_world_space_positions() {
    let description = decompose_scene(&test_scene());
    let geometry = merge_meshes(&description.meshes);
    // Cube "c" sits 2 units along the rotated group's x axis, one unit up
    let expected = Mat4::from_rotation_translation(Quat::from_rotation_y(0.4), Vec3::Y).transform_point3(Vec3::X * 2.0);
    let centroid = geometry.positions[geometry.positions.len() - 24..]
        .iter()
        .fold(Vec3::ZERO, |acc, p| acc + Vec3::from(*p))
        / 24.0;
    assert!(centroid.abs_diff_eq(expected, 1e-4), "{centroid} vs {expected}");
}

#[test]
fn test_material_packing() {
    let description = decompose_scene(&test_scene());
    let geometry = merge_meshes(&description.meshes);
    let packed = pack_materials(&geometry.materials);

    assert_eq!(packed.records.len(), 3);
    assert!(packed.has_kind(MaterialKind::ThickGlass));
    assert!(!packed.has_kind(MaterialKind::ShadowCatcher));
    assert_eq!(packed.diffuse.len(), 1);

    let defines = packed.defines();
    assert_eq!(defines.get("NUM_MATERIALS"), Some(DefineValue::UInt(3)));
    assert_eq!(defines.get("NUM_DIFFUSE_MAPS"), Some(DefineValue::UInt(1)));
    assert_eq!(defines.get("NUM_PBR_MAPS"), Some(DefineValue::UInt(0)));
}

#[test]
fn test_environment_distribution_normalized() {
    let description = decompose_scene(&test_scene());
    let image =
        bake_environment(&description.directional_lights, &description.ambient_lights, description.environment_light.as_ref());
    let dist = env_distribution(&image);

    assert_eq!((dist.width, dist.height), (image.width + 2, image.height + 1));
    assert!((dist.marginal_total() - 1.0).abs() < 1e-5);
    for y in 0..image.height {
        let row: Vec<f32> = (1..=image.width + 1).map(|x| dist.get(x, y)[0]).collect();
        assert!(row.windows(2).all(|w| w[1] >= w[0]), "row {y} not monotone");
        assert!((row[row.len() - 1] - 1.0).abs() < 1e-4);
    }
    let marginal: Vec<f32> = (0..dist.height).map(|y| dist.get(0, y)[0]).collect();
    assert!(marginal.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn test_hdr_environment_light_used() {
    let map = EnvironmentMap::new(8, 4, vec![0.5; 8 * 4 * 4], EnvEncoding::Linear).unwrap();
    let mut scene = Scene::new();
    scene.add(SceneNode::new("env", NodeKind::EnvironmentLight(EnvironmentLight::new(Arc::new(map)))));
    let ldr = EnvironmentMap::new(1, 1, vec![1.0; 4], EnvEncoding::Srgb).unwrap();
    scene.add(SceneNode::new("ldr", NodeKind::EnvironmentLight(EnvironmentLight::new(Arc::new(ldr)))));

    let description = decompose_scene(&scene);
    let env = description.environment_light.as_ref().unwrap();
    assert_eq!(env.map.as_ref().unwrap().width, 8);

    let image = bake_environment(&[], &[], Some(env));
    assert_eq!((image.width, image.height), (8, 4));
    assert!(image.data.chunks_exact(4).all(|t| (t[0] - 0.5).abs() < 1e-6));
}

#[test]
fn test_empty_scene() {
    let description = decompose_scene(&Scene::new());
    let geometry = merge_meshes(&description.meshes);
    let prims = geometry.primitives();
    let flat = flatten_bvh(&build_bvh(&prims), &prims);
    assert_eq!(flat.count(), 0);
    flat.verify_stack(1).unwrap();
    assert_eq!(pack_materials(&geometry.materials).block_len(), 1);
}
