use nalgebra_glm as glm;
use serde_json as js;

use crate::{
    json::{f32_or, to_vec4, vec3_or},
    SceneError,
};

/// Texture slot left empty; shaders fall back to the constant factor.
pub const NO_TEXTURE: u32 = u32::MAX;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Material {
    pub base_color:                 glm::Vec4,
    pub emissive:                   glm::Vec3,
    pub metallic:                   f32,
    pub roughness:                  f32,
    pub base_color_texture:         u32,
    pub normal_texture:             u32,
    pub metallic_roughness_texture: u32,
    pub emissive_texture:           u32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color:                 glm::vec4(0.8, 0.8, 0.8, 1.0),
            emissive:                   glm::Vec3::zeros(),
            metallic:                   0.0,
            roughness:                  1.0,
            base_color_texture:         NO_TEXTURE,
            normal_texture:             NO_TEXTURE,
            metallic_roughness_texture: NO_TEXTURE,
            emissive_texture:           NO_TEXTURE,
        }
    }
}

impl Material {
    pub fn from_json(name: &str, object: &js::Value, texture_names: &[String]) -> Result<Self, SceneError> {
        let texture = |key: &str| -> Result<u32, SceneError> {
            match object.get(key).and_then(|t| t.as_str()) {
                Some(texture) => texture_names.iter().position(|n| n == texture).map(|i| i as u32).ok_or_else(|| {
                    SceneError::malformed(format!("material `{}` uses unknown texture `{}`", name, texture))
                }),
                None => Ok(NO_TEXTURE),
            }
        };

        let defaults = Self::default();
        let base_color = match object.get("base_color") {
            Some(value) => to_vec4(value, "base_color")?,
            None => defaults.base_color,
        };

        Ok(Self {
            base_color,
            emissive: vec3_or(object, "emissive", defaults.emissive)?,
            metallic: f32_or(object, "metallic", defaults.metallic)?.clamp(0.0, 1.0),
            roughness: f32_or(object, "roughness", defaults.roughness)?.clamp(0.0, 1.0),
            base_color_texture: texture("base_color_texture")?,
            normal_texture: texture("normal_texture")?,
            metallic_roughness_texture: texture("metallic_roughness_texture")?,
            emissive_texture: texture("emissive_texture")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textures_resolve_by_name() {
        let object: js::Value =
            js::from_str(r#"{ "base_color_texture": "bricks", "roughness": 1.5, "metallic": 0.25 }"#).unwrap();
        let material = Material::from_json("wall", &object, &["grass".into(), "bricks".into()]).unwrap();
        assert_eq!(material.base_color_texture, 1);
        assert_eq!(material.normal_texture, NO_TEXTURE);
        assert_eq!(material.roughness, 1.0);
        assert_eq!(material.metallic, 0.25);
    }

    #[test]
    fn unknown_texture_is_an_error() {
        let object: js::Value = js::from_str(r#"{ "normal_texture": "missing" }"#).unwrap();
        assert!(Material::from_json("wall", &object, &[]).is_err());
    }
}
