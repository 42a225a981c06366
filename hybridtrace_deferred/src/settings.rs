use crate::RayTraceScale;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AoSettings {
    pub ray_length: f32,
    pub bias:       f32,
    pub scale:      RayTraceScale,
    /// Clip planes the blur uses to linearise depth.
    pub blur_near:  f32,
    pub blur_far:   f32,
}

impl Default for AoSettings {
    fn default() -> Self {
        Self { ray_length: 7.0, bias: 0.3, scale: RayTraceScale::Half, blur_near: 0.01, blur_far: 1000.0 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DiSettings {
    /// Candidate emitters drawn per pixel (`M`).
    pub lights_per_pixel: u32,
    pub temporal_reuse:   bool,
    pub spatial_reuse:    bool,
    /// History is clamped to `clamp_threshold * M` samples.
    pub clamp_threshold:  u32,
    pub samples:          u32,
    /// Spatial reuse radius in pixels.
    pub radius:           f32,
    pub bias:             f32,
    pub scale:            RayTraceScale,
}

impl Default for DiSettings {
    fn default() -> Self {
        Self {
            lights_per_pixel: 32,
            temporal_reuse:   true,
            spatial_reuse:    true,
            clamp_threshold:  20,
            samples:          5,
            radius:           30.0,
            bias:             0.1,
            scale:            RayTraceScale::Half,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GiSettings {
    pub probe_distance:            f32,
    pub rays_per_probe:            u32,
    pub hysteresis:                f32,
    pub depth_sharpness:           f32,
    pub normal_bias:               f32,
    pub energy_preservation:       f32,
    pub infinite_bounces:          bool,
    pub infinite_bounce_intensity: f32,
    pub visibility_test:           bool,
    pub scale:                     RayTraceScale,
}

impl Default for GiSettings {
    fn default() -> Self {
        Self {
            probe_distance:            1.0,
            rays_per_probe:            256,
            hysteresis:                0.98,
            depth_sharpness:           50.0,
            normal_bias:               0.25,
            energy_preservation:       0.85,
            infinite_bounces:          true,
            infinite_bounce_intensity: 1.7,
            visibility_test:           true,
            scale:                     RayTraceScale::Quarter,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReflectionSettings {
    pub bias:                f32,
    /// Surfaces rougher than this fall back to the GI term.
    pub roughness_threshold: f32,
    pub scale:               RayTraceScale,
}

impl Default for ReflectionSettings {
    fn default() -> Self {
        Self { bias: 0.5, roughness_threshold: 0.75, scale: RayTraceScale::Half }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SvgfSettings {
    pub phi_color:     f32,
    pub phi_normal:    f32,
    pub sigma_depth:   f32,
    pub alpha:         f32,
    pub moments_alpha: f32,
    pub iterations:    u32,
}

impl Default for SvgfSettings {
    fn default() -> Self {
        Self { phi_color: 10.0, phi_normal: 32.0, sigma_depth: 1.0, alpha: 0.01, moments_alpha: 0.2, iterations: 3 }
    }
}

/// Intermediate presented instead of the shaded result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugView {
    Final              = 0,
    Albedo             = 1,
    Normals            = 2,
    RoughnessMetallic  = 3,
    AmbientOcclusion   = 4,
    DirectLighting     = 5,
    GlobalIllumination = 6,
    Reflections        = 7,
    MotionVectors      = 8,
}

impl DebugView {
    pub const ALL: [Self; 9] = [
        Self::Final,
        Self::Albedo,
        Self::Normals,
        Self::RoughnessMetallic,
        Self::AmbientOcclusion,
        Self::DirectLighting,
        Self::GlobalIllumination,
        Self::Reflections,
        Self::MotionVectors,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl Default for DebugView {
    fn default() -> Self {
        Self::Final
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompositeSettings {
    pub enable_ao:          bool,
    pub enable_di:          bool,
    pub enable_gi:          bool,
    pub enable_reflections: bool,
    pub debug_view:         DebugView,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            enable_ao:          true,
            enable_di:          true,
            enable_gi:          true,
            enable_reflections: true,
            debug_view:         DebugView::Final,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HybridSettings {
    pub ao:         AoSettings,
    pub di:         DiSettings,
    pub gi:         GiSettings,
    pub reflection: ReflectionSettings,
    pub svgf:       SvgfSettings,
    pub composite:  CompositeSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tunables() {
        let settings = HybridSettings::default();
        assert_eq!(settings.ao.scale, RayTraceScale::Half);
        assert_eq!((settings.ao.blur_near, settings.ao.blur_far), (0.01, 1000.0));
        assert_eq!(settings.di.lights_per_pixel, 32);
        assert_eq!(settings.di.clamp_threshold, 20);
        assert_eq!(settings.gi.energy_preservation, 0.85);
        assert_eq!(settings.gi.scale, RayTraceScale::Quarter);
        assert_eq!(settings.svgf.iterations, 3);
        assert_eq!(settings.composite.debug_view, DebugView::Final);
    }

    #[test]
    fn debug_views_follow_key_order() {
        assert_eq!(DebugView::from_index(0), Some(DebugView::Final));
        assert_eq!(DebugView::from_index(8), Some(DebugView::MotionVectors));
        assert_eq!(DebugView::from_index(9), None);
        for (i, view) in DebugView::ALL.iter().enumerate() {
            assert_eq!(*view as usize, i);
        }
    }
}
