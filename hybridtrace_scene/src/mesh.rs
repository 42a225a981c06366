use itertools::Itertools;
use nalgebra_glm as glm;
use serde_json as js;

use crate::{
    bounds::Aabb,
    json::{to_vec2, to_vec3, to_vec4, vec_array},
    SceneError,
};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: glm::Vec3,
    pub normal:   glm::Vec3,
    pub texcoord: glm::Vec2,
    /// Tangent in xyz, bitangent sign in w.
    pub tangent:  glm::Vec4,
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub name:           String,
    pub vertices:       Vec<Vertex>,
    pub indices:        Vec<u32>,
    pub material_index: u32,
}

impl Mesh {
    pub fn from_json(name: &str, object: &js::Value, material_names: &[String]) -> Result<Self, SceneError> {
        let positions = vec_array(object, "positions", to_vec3)?;
        let normals = vec_array(object, "normals", to_vec3)?;
        let texcoords = vec_array(object, "texcoords", to_vec2)?;
        let tangents = vec_array(object, "tangents", to_vec4)?;

        let indices: Vec<u32> = match object.get("indices") {
            Some(js::Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|i| u32::try_from(i).ok())
                        .ok_or_else(|| SceneError::malformed(format!("mesh `{}` has an index that is not a u32", name)))
                })
                .collect::<Result<_, _>>()?,
            _ => (0..positions.len() as u32).collect(),
        };

        if positions.is_empty() {
            return Err(SceneError::malformed(format!("mesh `{}` has no positions", name)));
        }
        if indices.len() % 3 != 0 {
            return Err(SceneError::malformed(format!("mesh `{}` index count is not a multiple of 3", name)));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(SceneError::malformed(format!("mesh `{}` references missing vertex {}", name, bad)));
        }

        let normals = if normals.len() == positions.len() { normals } else { face_normals(&positions, &indices) };

        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| Vertex {
                position,
                normal: normals[i],
                texcoord: texcoords.get(i).copied().unwrap_or_else(glm::Vec2::zeros),
                tangent: tangents.get(i).copied().unwrap_or_else(|| glm::vec4(1.0, 0.0, 0.0, 1.0)),
            })
            .collect();

        let material_index = match object.get("material").and_then(|m| m.as_str()) {
            Some(material) => material_names
                .iter()
                .position(|n| n == material)
                .ok_or_else(|| SceneError::malformed(format!("mesh `{}` uses unknown material `{}`", name, material)))?
                as u32,
            None => 0,
        };

        Ok(Self { name: name.to_owned(), vertices, indices, material_index })
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = [glm::Vec3; 3]> + '_ {
        self.indices.iter().tuples().map(move |(&a, &b, &c)| {
            [self.vertices[a as usize].position, self.vertices[b as usize].position, self.vertices[c as usize].position]
        })
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }
}

/// Area-weighted vertex normals, used when a mesh comes without normals.
fn face_normals(positions: &[glm::Vec3], indices: &[u32]) -> Vec<glm::Vec3> {
    let mut normals = vec![glm::Vec3::zeros(); positions.len()];
    for (&a, &b, &c) in indices.iter().tuples() {
        let [pa, pb, pc] = [positions[a as usize], positions[b as usize], positions[c as usize]];
        let n = (pb - pa).cross(&(pc - pa));
        for i in [a, b, c] {
            normals[i as usize] += n;
        }
    }
    normals
        .into_iter()
        .map(|n| if n.norm_squared() > 0.0 { n.normalize() } else { glm::vec3(0.0, 1.0, 0.0) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> js::Value {
        js::from_str(
            r#"{
                "positions": [[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]],
                "indices": [0, 2, 1, 0, 3, 2],
                "material": "floor"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn missing_normals_are_generated_from_faces() {
        let mesh = Mesh::from_json("quad", &quad(), &["wall".into(), "floor".into()]).unwrap();
        assert_eq!(mesh.material_index, 1);
        assert_eq!(mesh.triangle_count(), 2);
        for vertex in mesh.vertices.iter() {
            assert!((vertex.normal - glm::vec3(0.0, 1.0, 0.0)).norm() < 1e-5);
        }
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let object: js::Value =
            js::from_str(r#"{ "positions": [[0, 0, 0], [1, 0, 0], [1, 1, 0]], "indices": [0, 1, 3] }"#).unwrap();
        assert!(matches!(Mesh::from_json("bad", &object, &[]), Err(SceneError::Malformed(_))));
    }

    #[test]
    fn indices_past_u32_do_not_wrap() {
        let object: js::Value =
            js::from_str(r#"{ "positions": [[0, 0, 0], [1, 0, 0], [1, 1, 0]], "indices": [0, 1, 4294967296] }"#)
                .unwrap();
        assert!(matches!(Mesh::from_json("wrapping", &object, &[]), Err(SceneError::Malformed(_))));
    }

    #[test]
    fn unknown_material_is_an_error() {
        assert!(Mesh::from_json("quad", &quad(), &["wall".into()]).is_err());
    }
}
