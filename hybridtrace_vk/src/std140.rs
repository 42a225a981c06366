use nalgebra_glm as glm;

/// Conversion of `nalgebra-glm` values into their std140 uniform counterparts.
pub trait ToStd140 {
    type Output;

    fn to_std140(&self) -> Self::Output;
}

impl ToStd140 for glm::Vec2 {
    type Output = std140::vec2;

    fn to_std140(&self) -> Self::Output {
        std140::vec2(self.x, self.y)
    }
}

impl ToStd140 for glm::Vec3 {
    type Output = std140::vec3;

    fn to_std140(&self) -> Self::Output {
        std140::vec3(self.x, self.y, self.z)
    }
}

impl ToStd140 for glm::Vec4 {
    type Output = std140::vec4;

    fn to_std140(&self) -> Self::Output {
        std140::vec4(self.x, self.y, self.z, self.w)
    }
}

impl ToStd140 for glm::UVec2 {
    type Output = std140::uvec2;

    fn to_std140(&self) -> Self::Output {
        std140::uvec2(self.x, self.y)
    }
}

impl ToStd140 for glm::IVec3 {
    type Output = std140::ivec3;

    fn to_std140(&self) -> Self::Output {
        std140::ivec3(self.x, self.y, self.z)
    }
}

impl ToStd140 for glm::Mat4 {
    type Output = std140::mat4x4;

    fn to_std140(&self) -> Self::Output {
        let [c0, c1, c2, c3] = columns(self);
        let column = |c: [f32; 4]| std140::vec4(c[0], c[1], c[2], c[3]);
        std140::mat4x4(column(c0), column(c1), column(c2), column(c3))
    }
}

fn columns(m: &glm::Mat4) -> [[f32; 4]; 4] {
    let column = |c: usize| [m[(0, c)], m[(1, c)], m[(2, c)], m[(3, c)]];
    [column(0), column(1), column(2), column(3)]
}

pub fn boolean(value: bool) -> std140::boolean {
    if value {
        std140::boolean::True
    } else {
        std140::boolean::False
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrices_are_stored_column_major() {
        let m = glm::translation(&glm::vec3(1.0, 2.0, 3.0));
        let converted = columns(&m);
        // The translation lives in the last column.
        assert_eq!(converted[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(converted[0], [1.0, 0.0, 0.0, 0.0]);
    }
}
