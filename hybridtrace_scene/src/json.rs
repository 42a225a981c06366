use nalgebra_glm as glm;
use serde_json as js;

use crate::SceneError;

fn floats<const N: usize>(value: &js::Value, what: &str) -> Result<[f32; N], SceneError> {
    let array = value
        .as_array()
        .filter(|array| array.len() == N)
        .ok_or_else(|| SceneError::malformed(format!("`{}` must be an array of {} numbers", what, N)))?;
    let mut out = [0.0; N];
    for (dst, src) in out.iter_mut().zip(array) {
        *dst = src
            .as_f64()
            .ok_or_else(|| SceneError::malformed(format!("`{}` contains a non-number", what)))? as f32;
    }
    Ok(out)
}

pub fn to_vec2(value: &js::Value, what: &str) -> Result<glm::Vec2, SceneError> {
    floats::<2>(value, what).map(|v| glm::make_vec2(&v))
}

pub fn to_vec3(value: &js::Value, what: &str) -> Result<glm::Vec3, SceneError> {
    floats::<3>(value, what).map(|v| glm::make_vec3(&v))
}

pub fn to_vec4(value: &js::Value, what: &str) -> Result<glm::Vec4, SceneError> {
    floats::<4>(value, what).map(|v| glm::make_vec4(&v))
}

/// Optional vector field with a fallback.
pub fn vec3_or(object: &js::Value, key: &str, default: glm::Vec3) -> Result<glm::Vec3, SceneError> {
    match object.get(key) {
        Some(value) => to_vec3(value, key),
        None => Ok(default),
    }
}

pub fn f32_or(object: &js::Value, key: &str, default: f32) -> Result<f32, SceneError> {
    match object.get(key) {
        Some(value) => value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| SceneError::malformed(format!("`{}` must be a number", key))),
        None => Ok(default),
    }
}

/// Array of fixed-size vectors, e.g. `"positions": [[0, 1, 2], ...]`.
pub fn vec_array<T>(
    object: &js::Value,
    key: &str,
    convert: impl Fn(&js::Value, &str) -> Result<T, SceneError>,
) -> Result<Vec<T>, SceneError> {
    match object.get(key) {
        Some(js::Value::Array(values)) => values.iter().map(|v| convert(v, key)).collect(),
        Some(_) => Err(SceneError::malformed(format!("`{}` must be an array", key))),
        None => Ok(Vec::new()),
    }
}

/// Translation, rotation (degrees, XYZ order) and scale combined into a model matrix.
pub fn to_transform(object: &js::Value) -> Result<glm::Mat4, SceneError> {
    let translation = vec3_or(object, "translation", glm::Vec3::zeros())?;
    let rotation = vec3_or(object, "rotation", glm::Vec3::zeros())?;
    let scale = match object.get("scale") {
        Some(js::Value::Number(s)) => {
            let s = s.as_f64().unwrap_or(1.0) as f32;
            glm::vec3(s, s, s)
        }
        Some(value) => to_vec3(value, "scale")?,
        None => glm::vec3(1.0, 1.0, 1.0),
    };

    let mut transform = glm::translation(&translation);
    transform = glm::rotate_x(&transform, rotation.x.to_radians());
    transform = glm::rotate_y(&transform, rotation.y.to_radians());
    transform = glm::rotate_z(&transform, rotation.z.to_radians());
    Ok(glm::scale(&transform, &scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_require_exact_arity() {
        let value: js::Value = js::from_str("[1, 2, 3]").unwrap();
        assert_eq!(to_vec3(&value, "p").unwrap(), glm::vec3(1.0, 2.0, 3.0));
        assert!(to_vec2(&value, "p").is_err());
        assert!(to_vec4(&value, "p").is_err());
    }

    #[test]
    fn transform_applies_scale_before_translation() {
        let object: js::Value = js::from_str(r#"{ "translation": [10, 0, 0], "scale": 2 }"#).unwrap();
        let transform = to_transform(&object).unwrap();
        let p = transform * glm::vec4(1.0, 1.0, 1.0, 1.0);
        assert!((p.xyz() - glm::vec3(12.0, 2.0, 2.0)).norm() < 1e-5);
    }

    #[test]
    fn missing_optional_fields_fall_back() {
        let object: js::Value = js::from_str("{}").unwrap();
        assert_eq!(f32_or(&object, "roughness", 0.5).unwrap(), 0.5);
        assert!(vec_array(&object, "normals", to_vec3).unwrap().is_empty());
    }
}
