//! Flattening a scene tree into the renderer's input.

use glam::Mat4;
use std::sync::Arc;
use tracing::warn;

use super::{
    AmbientLight, Background, DirectionalLight, EnvironmentLight, Geometry, Material, MeshMaterial,
    NodeKind, Scene, SceneNode,
};

/// Mesh placed in world space.
#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub name: String,
    pub geometry: Arc<Geometry>,
    pub material: Arc<Material>,
    pub world: Mat4,
    pub visible: bool,
}

/// Everything the pipeline needs from a scene, in world space.
#[derive(Debug, Clone, Default)]
pub struct SceneDescription {
    pub background: Option<Background>,
    pub meshes: Vec<MeshInstance>,
    /// Directions are already transformed to world space
    pub directional_lights: Vec<DirectionalLight>,
    pub ambient_lights: Vec<AmbientLight>,
    /// At most one entry
    pub environment_light: Option<EnvironmentLight>,
}

/// Walk the scene tree and sort nodes into meshes and lights.
///
/// Meshes without geometry or with a non-standard material are skipped.
/// The first environment light with an HDR map is used; later ones are ignored.
pub fn decompose_scene(scene: &Scene) -> SceneDescription {
    let mut desc = SceneDescription {
        background: scene.background.clone(),
        ..Default::default()
    };
    for node in &scene.nodes {
        visit(node, Mat4::IDENTITY, &mut desc);
    }
    desc
}

fn visit(node: &SceneNode, parent: Mat4, desc: &mut SceneDescription) {
    let world = parent * node.transform;

    match &node.kind {
        NodeKind::Group => {}
        NodeKind::Mesh { geometry, material } => match (geometry, material) {
            (None, _) => warn!(mesh = %node.name, "mesh must have a geometry, skipped"),
            (Some(_), MeshMaterial::Unsupported(kind)) => {
                warn!(mesh = %node.name, material = %kind, "mesh must use a standard material to be rendered, skipped")
            }
            (Some(geometry), MeshMaterial::Standard(material)) => desc.meshes.push(MeshInstance {
                name: node.name.clone(),
                geometry: Arc::clone(geometry),
                material: Arc::clone(material),
                world,
                visible: node.visible,
            }),
        },
        NodeKind::DirectionalLight(light) => {
            let mut light = *light;
            light.direction = world.transform_vector3(light.direction).normalize_or_zero();
            desc.directional_lights.push(light);
        }
        NodeKind::AmbientLight(light) => desc.ambient_lights.push(*light),
        NodeKind::EnvironmentLight(light) => {
            if !light.is_valid() {
                warn!(light = %node.name, "environment light needs an RGBE or linear HDR map, ignored");
            } else if desc.environment_light.is_some() {
                warn!(light = %node.name, "only one environment light can be used per scene, ignored");
            } else {
                desc.environment_light = Some(light.clone());
            }
        }
    }

    for child in &node.children {
        visit(child, world, desc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{EnvEncoding, EnvironmentMap};
    use glam::Vec3;

    fn env_light(value: f32, encoding: EnvEncoding) -> EnvironmentLight {
        let map = EnvironmentMap::new(1, 1, vec![value; 4], encoding).unwrap();
        EnvironmentLight::new(Arc::new(map))
    }

    #[test]
    fn test_meshes_and_lights_sorted() {
        let mut scene = Scene::new();
        let geo = Arc::new(Geometry::plane(1.0));
        let mat = Arc::new(Material::default());
        scene.add(
            SceneNode::group("root")
                .with_transform(Mat4::from_translation(Vec3::X))
                .with_child(SceneNode::mesh("floor", geo, mat))
                .with_child(SceneNode::new(
                    "sun",
                    NodeKind::DirectionalLight(DirectionalLight::new(Vec3::ONE, 1.0, Vec3::Y)),
                ))
                .with_child(SceneNode::new(
                    "sky",
                    NodeKind::AmbientLight(AmbientLight { color: Vec3::ONE, intensity: 0.5 }),
                )),
        );

        let desc = decompose_scene(&scene);
        assert_eq!(desc.meshes.len(), 1);
        assert_eq!(desc.meshes[0].world.w_axis.truncate(), Vec3::X);
        assert_eq!(desc.directional_lights.len(), 1);
        assert_eq!(desc.ambient_lights.len(), 1);
        assert!(desc.environment_light.is_none());
    }

    #[test]
    fn test_invalid_meshes_skipped() {
        let mut scene = Scene::new();
        scene.add(SceneNode::new(
            "no_geo",
            NodeKind::Mesh {
                geometry: None,
                material: MeshMaterial::Standard(Arc::new(Material::default())),
            },
        ));
        scene.add(SceneNode::new(
            "toon",
            NodeKind::Mesh {
                geometry: Some(Arc::new(Geometry::plane(1.0))),
                material: MeshMaterial::Unsupported("toon".into()),
            },
        ));
        assert!(decompose_scene(&scene).meshes.is_empty());
    }

    #[test]
    fn test_first_valid_environment_light_wins() {
        let mut scene = Scene::new();
        scene.add(SceneNode::new("ldr", NodeKind::EnvironmentLight(env_light(9.0, EnvEncoding::Srgb))));
        scene.add(SceneNode::new("first", NodeKind::EnvironmentLight(env_light(1.0, EnvEncoding::Rgbe))));
        scene.add(SceneNode::new("second", NodeKind::EnvironmentLight(env_light(2.0, EnvEncoding::Linear))));

        let desc = decompose_scene(&scene);
        let env = desc.environment_light.expect("environment light");
        assert_eq!(env.map.unwrap().data[0], 1.0);
    }

    #[test]
    fn test_light_direction_in_world_space() {
        let rot = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let mut scene = Scene::new();
        scene.add(
            SceneNode::new(
                "sun",
                NodeKind::DirectionalLight(DirectionalLight::new(Vec3::ONE, 1.0, Vec3::X)),
            )
            .with_transform(rot),
        );
        let desc = decompose_scene(&scene);
        let d = desc.directional_lights[0].direction;
        assert!((d - Vec3::Y).length() < 1e-5);
    }
}
