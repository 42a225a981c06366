pub mod accel;
pub mod blue_noise;
pub mod bounds;
pub mod camera;
pub mod emitters;
pub mod environment;
pub mod error;
pub mod gpu;
pub mod json;
pub mod materials;
pub mod mesh;

pub use blue_noise::BlueNoise;
pub use bounds::Aabb;
pub use camera::{Camera, CameraState};
pub use error::SceneError;
pub use gpu::GpuScene;

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{emitters::Emitter, json::to_transform, materials::Material, mesh::Mesh};
use nalgebra_glm as glm;
use serde_json as js;

pub const SCENE_FILE: &str = "scene.json";

/// A placement of a mesh in the world.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub mesh:      u32,
    pub material:  u32,
    pub transform: glm::Mat4,
}

#[derive(Clone, Debug)]
pub struct Scene {
    pub camera:        Camera,
    pub meshes:        Vec<Mesh>,
    pub materials:     Vec<Material>,
    pub texture_paths: Vec<PathBuf>,
    pub instances:     Vec<Instance>,
    pub emitters:      Vec<Emitter>,
    /// World-space bounds of every instance.
    pub bounds:        Aabb,
}

fn named_entries<'a>(scene: &'a js::Value, key: &str) -> Result<Vec<(String, &'a js::Value)>, SceneError> {
    match scene.get(key) {
        Some(js::Value::Object(entries)) => Ok(entries.iter().map(|(name, value)| (name.clone(), value)).collect()),
        Some(_) => Err(SceneError::malformed(format!("`{}` must be an object keyed by name", key))),
        None => Ok(Vec::new()),
    }
}

fn array_entries<'a>(scene: &'a js::Value, key: &str) -> Result<&'a [js::Value], SceneError> {
    match scene.get(key) {
        Some(js::Value::Array(entries)) => Ok(entries),
        Some(_) => Err(SceneError::malformed(format!("`{}` must be an array", key))),
        None => Ok(&[]),
    }
}

fn index_of(names: &[String], name: &str, what: &str) -> Result<u32, SceneError> {
    names
        .iter()
        .position(|n| n == name)
        .map(|i| i as u32)
        .ok_or_else(|| SceneError::malformed(format!("unknown {} `{}`", what, name)))
}

impl Scene {
    /// Loads `scene.json` from `directory`. Texture paths are relative to it.
    pub fn load<P: AsRef<Path>>(directory: P) -> Result<Self, SceneError> {
        let directory = directory.as_ref();
        let path = directory.join(SCENE_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| SceneError::Io { path: path.clone(), source })?;
        let description: js::Value =
            js::from_str(&contents).map_err(|source| SceneError::Json { path: path.clone(), source })?;

        let scene = Self::from_json(&description, directory)?;
        log::info!(
            "Loaded {}: {} meshes, {} instances, {} materials, {} textures, {} emitters",
            path.display(),
            scene.meshes.len(),
            scene.instances.len(),
            scene.materials.len(),
            scene.texture_paths.len(),
            scene.emitters.len()
        );
        Ok(scene)
    }

    pub fn from_json(description: &js::Value, directory: &Path) -> Result<Self, SceneError> {
        let camera = match description.get("camera") {
            Some(camera) => Camera::from_json(camera)?,
            None => Camera::default(),
        };

        let (texture_names, texture_paths): (Vec<String>, Vec<PathBuf>) = named_entries(description, "textures")?
            .into_iter()
            .map(|(name, value)| {
                let file = value
                    .as_str()
                    .ok_or_else(|| SceneError::malformed(format!("texture `{}` must be a path", name)))?;
                Ok((name, directory.join(file)))
            })
            .collect::<Result<Vec<_>, SceneError>>()?
            .into_iter()
            .unzip();

        let mut material_names = Vec::new();
        let mut materials = Vec::new();
        for (name, value) in named_entries(description, "materials")? {
            materials.push(Material::from_json(&name, value, &texture_names)?);
            material_names.push(name);
        }
        if materials.is_empty() {
            material_names.push("default".to_owned());
            materials.push(Material::default());
        }

        let mut mesh_names = Vec::new();
        let mut meshes = Vec::new();
        for (name, value) in named_entries(description, "meshes")? {
            meshes.push(Mesh::from_json(&name, value, &material_names)?);
            mesh_names.push(name);
        }

        let instances = match description.get("instances") {
            Some(_) => array_entries(description, "instances")?
                .iter()
                .map(|object| {
                    let mesh_name = object
                        .get("mesh")
                        .and_then(|m| m.as_str())
                        .ok_or_else(|| SceneError::malformed("instance is missing `mesh`"))?;
                    let mesh = index_of(&mesh_names, mesh_name, "mesh")?;
                    let material = match object.get("material").and_then(|m| m.as_str()) {
                        Some(material) => index_of(&material_names, material, "material")?,
                        None => meshes[mesh as usize].material_index,
                    };
                    Ok(Instance { mesh, material, transform: to_transform(object)? })
                })
                .collect::<Result<Vec<_>, SceneError>>()?,
            // Without an explicit list every mesh is placed once, untransformed.
            None => meshes
                .iter()
                .enumerate()
                .map(|(i, mesh)| Instance {
                    mesh:      i as u32,
                    material:  mesh.material_index,
                    transform: glm::Mat4::identity(),
                })
                .collect(),
        };

        let emitters = array_entries(description, "emitters")?
            .iter()
            .map(Emitter::from_json)
            .collect::<Result<Vec<_>, SceneError>>()?;

        let bounds = instances
            .iter()
            .map(|instance| meshes[instance.mesh as usize].bounds().transformed(&instance.transform))
            .fold(Aabb::empty(), |bounds, instance| bounds.union(&instance));

        Ok(Self { camera, meshes, materials, texture_paths, instances, emitters, bounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORNELL: &str = r#"{
        "camera": { "position": [278, 273, -800], "yaw": 180, "vertical_fov": 40 },
        "materials": {
            "white": { "base_color": [0.73, 0.73, 0.73, 1.0] },
            "light": { "base_color": [1, 1, 1, 1], "emissive": [17, 12, 4] }
        },
        "meshes": {
            "floor": {
                "positions": [[0, 0, 0], [556, 0, 0], [556, 0, 559], [0, 0, 559]],
                "indices": [0, 1, 2, 0, 2, 3],
                "material": "white"
            }
        },
        "instances": [
            { "mesh": "floor" },
            { "mesh": "floor", "material": "light", "translation": [0, 548, 0] }
        ],
        "emitters": [
            { "p0": [213, 548, 227], "p1": [343, 548, 227], "p2": [343, 548, 332], "intensity": [17, 12, 4] }
        ]
    }"#;

    #[test]
    fn cornell_box_parses() {
        let description: js::Value = js::from_str(CORNELL).unwrap();
        let scene = Scene::from_json(&description, Path::new("scenes/cornell")).unwrap();

        assert_eq!(scene.meshes.len(), 1);
        assert_eq!(scene.instances.len(), 2);
        assert_eq!(scene.emitters.len(), 1);
        assert_eq!(scene.camera.vertical_fov, 40.0);

        // Object keys are sorted, so "light" comes before "white".
        assert_eq!(scene.instances[0].material, 1);
        assert_eq!(scene.instances[1].material, 0);

        assert_eq!(scene.bounds.min, glm::vec3(0.0, 0.0, 0.0));
        assert_eq!(scene.bounds.max, glm::vec3(556.0, 548.0, 559.0));
    }

    #[test]
    fn meshes_without_instances_are_placed_once() {
        let description: js::Value = js::from_str(
            r#"{ "meshes": { "tri": { "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]] } } }"#,
        )
        .unwrap();
        let scene = Scene::from_json(&description, Path::new(".")).unwrap();
        assert_eq!(scene.instances.len(), 1);
        assert_eq!(scene.materials.len(), 1);
        assert_eq!(scene.instances[0].transform, glm::Mat4::identity());
    }

    #[test]
    fn unknown_references_are_rejected() {
        let description: js::Value = js::from_str(
            r#"{
                "meshes": { "tri": { "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]] } },
                "instances": [{ "mesh": "quad" }]
            }"#,
        )
        .unwrap();
        assert!(matches!(Scene::from_json(&description, Path::new(".")), Err(SceneError::Malformed(_))));
    }

    #[test]
    fn missing_scene_file_is_an_io_error() {
        assert!(matches!(Scene::load("/nonexistent/scene/dir"), Err(SceneError::Io { .. })));
    }
}
