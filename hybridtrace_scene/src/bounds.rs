use nalgebra_glm as glm;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: glm::Vec3,
    pub max: glm::Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn empty() -> Self {
        Self { min: glm::vec3(f32::MAX, f32::MAX, f32::MAX), max: glm::vec3(f32::MIN, f32::MIN, f32::MIN) }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a glm::Vec3>) -> Self {
        points.into_iter().fold(Self::empty(), |bounds, p| bounds.grow(p))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn grow(&self, p: &glm::Vec3) -> Self {
        Self { min: glm::min2(&self.min, p), max: glm::max2(&self.max, p) }
    }

    pub fn union(&self, other: &Self) -> Self {
        Self { min: glm::min2(&self.min, &other.min), max: glm::max2(&self.max, &other.max) }
    }

    pub fn extent(&self) -> glm::Vec3 {
        if self.is_empty() {
            glm::Vec3::zeros()
        } else {
            self.max - self.min
        }
    }

    pub fn corners(&self) -> [glm::Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            glm::vec3(a.x, a.y, a.z),
            glm::vec3(b.x, a.y, a.z),
            glm::vec3(a.x, b.y, a.z),
            glm::vec3(b.x, b.y, a.z),
            glm::vec3(a.x, a.y, b.z),
            glm::vec3(b.x, a.y, b.z),
            glm::vec3(a.x, b.y, b.z),
            glm::vec3(b.x, b.y, b.z),
        ]
    }

    /// Bounds of this box after `transform`, i.e. of its eight transformed corners.
    pub fn transformed(&self, transform: &glm::Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let corners = self.corners().map(|c| (transform * glm::vec4(c.x, c.y, c.z, 1.0)).xyz());
        Self::from_points(corners.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_box_absorbs_points() {
        let bounds = Aabb::from_points([glm::vec3(1.0, -2.0, 3.0), glm::vec3(-1.0, 2.0, 0.0)].iter());
        assert_eq!(bounds.min, glm::vec3(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, glm::vec3(1.0, 2.0, 3.0));
        assert!(Aabb::empty().is_empty());
        assert_eq!(Aabb::empty().extent(), glm::Vec3::zeros());
    }

    #[test]
    fn rotation_grows_bounds_to_fit_corners() {
        let unit = Aabb { min: glm::vec3(-1.0, -1.0, -1.0), max: glm::vec3(1.0, 1.0, 1.0) };
        let rotated = unit.transformed(&glm::rotation(45f32.to_radians(), &glm::vec3(0.0, 1.0, 0.0)));
        let expected = 2f32.sqrt();
        assert!((rotated.max.x - expected).abs() < 1e-5);
        assert!((rotated.max.y - 1.0).abs() < 1e-5);
    }
}
