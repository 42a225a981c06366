use erupt::vk;
use hybridtrace_vk::image::mip_extent;

/// Working resolution of a ray-traced stage relative to the render extent.
/// The stage reads the G-buffer at the matching mip.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RayTraceScale {
    Full    = 0,
    Half    = 1,
    Quarter = 2,
}

impl RayTraceScale {
    pub fn gbuffer_mip(self) -> u32 {
        self as u32
    }

    pub fn extent(self, render_extent: vk::Extent2D) -> vk::Extent2D {
        mip_extent(render_extent, self.gbuffer_mip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_halves_per_step() {
        let render = vk::Extent2D { width: 1920, height: 1080 };
        let full = RayTraceScale::Full.extent(render);
        let half = RayTraceScale::Half.extent(render);
        let quarter = RayTraceScale::Quarter.extent(render);
        assert_eq!((full.width, full.height), (1920, 1080));
        assert_eq!((half.width, half.height), (960, 540));
        assert_eq!((quarter.width, quarter.height), (480, 270));
        assert_eq!(RayTraceScale::Quarter.gbuffer_mip(), 2);
    }

    #[test]
    fn tiny_extents_never_reach_zero() {
        let render = vk::Extent2D { width: 3, height: 1 };
        let quarter = RayTraceScale::Quarter.extent(render);
        assert_eq!((quarter.width, quarter.height), (1, 1));
    }
}
