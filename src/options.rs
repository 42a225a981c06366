use std::{ffi::OsString, path::PathBuf, str::FromStr};

use erupt::vk;
use hybridtrace_deferred::HybridSettings;
use hybridtrace_pure::PathTracerSettings;
use hybridtrace_vk::frame_ring::DEFAULT_FRAME_RING;
use pico_args::Arguments;
use thiserror::Error;

use crate::{taa::TaaSettings, tonemap::TonemapSettings};

pub const USAGE: &str = "\
Usage: hybridtrace --scene <dir> [--envmap <file>] [--mode hybrid|path]
                   [--width N] [--height N] [--no-vsync] [--validation]
                   [--upscale F] [--shaders <dir>] [--blue-noise <dir>]";

pub const DEFAULT_SHADER_DIR: &str = "assets/shaders";
pub const DEFAULT_BLUE_NOISE_DIR: &str = "assets/blue_noise";

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("{0}")]
    Parse(#[from] pico_args::Error),
    #[error("unknown mode `{0}`, expected `hybrid` or `path`")]
    Mode(String),
    #[error("unexpected arguments: {0:?}")]
    Unexpected(Vec<OsString>),
    #[error("--{0} must be positive")]
    NotPositive(&'static str),
    #[error("help requested")]
    Help,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Hybrid,
    PathTracing,
}

impl RenderMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Hybrid => Self::PathTracing,
            Self::PathTracing => Self::Hybrid,
        }
    }
}

impl FromStr for RenderMode {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(Self::Hybrid),
            "path" => Ok(Self::PathTracing),
            other => Err(OptionsError::Mode(other.to_owned())),
        }
    }
}

/// Device and presentation parameters fixed at startup.
#[derive(Copy, Clone, Debug)]
pub struct ContextConfig {
    pub render_extent:  vk::Extent2D,
    /// Window extent over render extent.
    pub upscale_factor: f32,
    pub validation:     bool,
    pub vsync:          bool,
    pub frame_ring:     usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            render_extent:  vk::Extent2D { width: 1280, height: 720 },
            upscale_factor: 1.0,
            validation:     cfg!(debug_assertions),
            vsync:          true,
            frame_ring:     DEFAULT_FRAME_RING,
        }
    }
}

impl ContextConfig {
    pub fn window_extent(&self) -> vk::Extent2D {
        let scale = |e: u32| ((e as f32 * self.upscale_factor).round() as u32).max(1);
        vk::Extent2D { width: scale(self.render_extent.width), height: scale(self.render_extent.height) }
    }

    pub fn render_extent_for(&self, window: vk::Extent2D) -> vk::Extent2D {
        let scale = |e: u32| ((e as f32 / self.upscale_factor).round() as u32).max(1);
        vk::Extent2D { width: scale(window.width), height: scale(window.height) }
    }
}

/// Tunables of every pass, all adjustable at runtime.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RendererSettings {
    pub hybrid:      HybridSettings,
    pub path_tracer: PathTracerSettings,
    pub taa:         TaaSettings,
    pub tonemap:     TonemapSettings,
}

#[derive(Clone, Debug)]
pub struct Options {
    pub scene:      PathBuf,
    pub envmap:     Option<PathBuf>,
    pub mode:       RenderMode,
    pub shaders:    PathBuf,
    pub blue_noise: PathBuf,
    pub context:    ContextConfig,
}

impl Options {
    pub fn from_env() -> Result<Self, OptionsError> {
        Self::parse(Arguments::from_env())
    }

    pub fn parse(mut args: Arguments) -> Result<Self, OptionsError> {
        if args.contains(["-h", "--help"]) {
            return Err(OptionsError::Help);
        }

        let defaults = ContextConfig::default();
        let width = args.opt_value_from_str("--width")?.unwrap_or(defaults.render_extent.width);
        let height = args.opt_value_from_str("--height")?.unwrap_or(defaults.render_extent.height);
        let upscale_factor = args.opt_value_from_str("--upscale")?.unwrap_or(defaults.upscale_factor);
        if width == 0 {
            return Err(OptionsError::NotPositive("width"));
        }
        if height == 0 {
            return Err(OptionsError::NotPositive("height"));
        }
        if upscale_factor <= 0.0 {
            return Err(OptionsError::NotPositive("upscale"));
        }

        let context = ContextConfig {
            render_extent: vk::Extent2D { width, height },
            upscale_factor,
            validation: args.contains("--validation") || defaults.validation,
            vsync: !args.contains("--no-vsync"),
            frame_ring: defaults.frame_ring,
        };

        let options = Self {
            scene: args.value_from_str("--scene")?,
            envmap: args.opt_value_from_str("--envmap")?,
            mode: args.opt_value_from_str("--mode")?.unwrap_or(RenderMode::Hybrid),
            shaders: args.opt_value_from_str("--shaders")?.unwrap_or_else(|| DEFAULT_SHADER_DIR.into()),
            blue_noise: args.opt_value_from_str("--blue-noise")?.unwrap_or_else(|| DEFAULT_BLUE_NOISE_DIR.into()),
            context,
        };

        let remaining = args.finish();
        if !remaining.is_empty() {
            return Err(OptionsError::Unexpected(remaining));
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, OptionsError> {
        Options::parse(Arguments::from_vec(args.iter().map(OsString::from).collect()))
    }

    #[test]
    fn minimal_command_line_uses_defaults() {
        let options = parse(&["--scene", "scenes/cornell"]).unwrap();
        assert_eq!(options.scene, PathBuf::from("scenes/cornell"));
        assert_eq!(options.envmap, None);
        assert_eq!(options.mode, RenderMode::Hybrid);
        let extent = options.context.render_extent;
        assert_eq!((extent.width, extent.height), (1280, 720));
        assert_eq!(options.context.frame_ring, 3);
        assert!(options.context.vsync);
        assert_eq!(options.shaders, PathBuf::from(DEFAULT_SHADER_DIR));
    }

    #[test]
    fn full_command_line() {
        let options = parse(&[
            "--scene", "s", "--envmap", "sky.hdr", "--mode", "path", "--width", "1920", "--height", "1080",
            "--no-vsync", "--upscale", "2",
        ])
        .unwrap();
        assert_eq!(options.envmap, Some(PathBuf::from("sky.hdr")));
        assert_eq!(options.mode, RenderMode::PathTracing);
        assert!(!options.context.vsync);
        let window = options.context.window_extent();
        assert_eq!((window.width, window.height), (3840, 2160));
        let render = options.context.render_extent_for(window);
        assert_eq!((render.width, render.height), (1920, 1080));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(matches!(parse(&[]), Err(OptionsError::Parse(_))));
        assert!(matches!(parse(&["--scene", "s", "--mode", "raster"]), Err(OptionsError::Parse(_))));
        assert!(matches!(parse(&["--scene", "s", "--frobnicate"]), Err(OptionsError::Unexpected(_))));
        assert!(matches!(parse(&["--scene", "s", "--width", "0"]), Err(OptionsError::NotPositive("width"))));
        assert!(matches!(parse(&["--help"]), Err(OptionsError::Help)));
    }

    #[test]
    fn mode_toggles_back_and_forth() {
        assert_eq!(RenderMode::Hybrid.toggled(), RenderMode::PathTracing);
        assert_eq!(RenderMode::PathTracing.toggled().toggled(), RenderMode::PathTracing);
    }
}
