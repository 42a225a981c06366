use hybridtrace_deferred::DebugView;
use hybridtrace_scene::Camera;
use nalgebra_glm as glm;
use winit::event::{ElementState, MouseButton, VirtualKeyCode};

/// World units per second.
pub const MOVE_SPEED: f32 = 2.0;
pub const FAST_MULTIPLIER: f32 = 5.0;
/// Degrees per pixel of mouse travel.
pub const ROTATE_SPEED: f32 = 0.15;

/// Runtime toggles bound to single keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    ToggleMode,
    DebugView(DebugView),
    ToggleGi,
    ToggleTaa,
}

pub fn command_for(key: VirtualKeyCode) -> Option<Command> {
    use VirtualKeyCode::*;
    let debug_view = |index| DebugView::from_index(index).map(Command::DebugView);
    match key {
        Tab => Some(Command::ToggleMode),
        G => Some(Command::ToggleGi),
        T => Some(Command::ToggleTaa),
        Key1 => debug_view(0),
        Key2 => debug_view(1),
        Key3 => debug_view(2),
        Key4 => debug_view(3),
        Key5 => debug_view(4),
        Key6 => debug_view(5),
        Key7 => debug_view(6),
        Key8 => debug_view(7),
        Key9 => debug_view(8),
        _ => None,
    }
}

/// Fly camera: WASD/QE move, right mouse drag looks around, shift speeds up.
#[derive(Copy, Clone, Debug, Default)]
pub struct CameraController {
    forward:     bool,
    backward:    bool,
    left:        bool,
    right:       bool,
    up:          bool,
    down:        bool,
    fast:        bool,
    rotating:    bool,
    mouse_delta: (f64, f64),
}

impl CameraController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the key drives the camera.
    pub fn key(&mut self, key: VirtualKeyCode, state: ElementState) -> bool {
        let pressed = state == ElementState::Pressed;
        let flag = match key {
            VirtualKeyCode::W => &mut self.forward,
            VirtualKeyCode::S => &mut self.backward,
            VirtualKeyCode::A => &mut self.left,
            VirtualKeyCode::D => &mut self.right,
            VirtualKeyCode::E => &mut self.up,
            VirtualKeyCode::Q => &mut self.down,
            VirtualKeyCode::LShift | VirtualKeyCode::RShift => &mut self.fast,
            _ => return false,
        };
        *flag = pressed;
        true
    }

    pub fn mouse_button(&mut self, button: MouseButton, state: ElementState) {
        if button == MouseButton::Right {
            self.rotating = state == ElementState::Pressed;
            self.mouse_delta = (0.0, 0.0);
        }
    }

    pub fn mouse_motion(&mut self, delta: (f64, f64)) {
        if self.rotating {
            self.mouse_delta.0 += delta.0;
            self.mouse_delta.1 += delta.1;
        }
    }

    /// Applies input gathered since the last call over `dt` seconds.
    pub fn update(&mut self, camera: &mut Camera, dt: f32) {
        let (dx, dy) = std::mem::take(&mut self.mouse_delta);
        camera.yaw -= dx as f32 * ROTATE_SPEED;
        camera.pitch = (camera.pitch - dy as f32 * ROTATE_SPEED).clamp(-Camera::MAX_PITCH, Camera::MAX_PITCH);

        let axis = |positive: bool, negative: bool| positive as i32 as f32 - negative as i32 as f32;
        let direction = camera.forward() * axis(self.forward, self.backward)
            + camera.right() * axis(self.right, self.left)
            + glm::Vec3::y() * axis(self.up, self.down);
        if direction.norm_squared() > 0.0 {
            let speed = if self.fast { MOVE_SPEED * FAST_MULTIPLIER } else { MOVE_SPEED };
            camera.position += direction.normalize() * speed * dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_controller_leaves_camera_alone() {
        let mut camera = Camera::default();
        let before = camera;
        CameraController::new().update(&mut camera, 0.5);
        assert!(camera.approx_eq(&before));
    }

    #[test]
    fn forward_moves_along_view_direction() {
        let mut controller = CameraController::new();
        assert!(controller.key(VirtualKeyCode::W, ElementState::Pressed));
        let mut camera = Camera::default();
        let start = camera.position;
        controller.update(&mut camera, 1.0);
        let moved = camera.position - start;
        assert!((moved - Camera::default().forward() * MOVE_SPEED).norm() < 1e-5);

        controller.key(VirtualKeyCode::LShift, ElementState::Pressed);
        let start = camera.position;
        controller.update(&mut camera, 1.0);
        assert!(((camera.position - start).norm() - MOVE_SPEED * FAST_MULTIPLIER).abs() < 1e-4);

        controller.key(VirtualKeyCode::W, ElementState::Released);
        let start = camera.position;
        controller.update(&mut camera, 1.0);
        assert_eq!(camera.position, start);
    }

    #[test]
    fn dragging_rotates_only_with_right_button() {
        let mut controller = CameraController::new();
        let mut camera = Camera::default();
        controller.mouse_motion((100.0, 0.0));
        controller.update(&mut camera, 0.016);
        assert_eq!(camera.yaw, 0.0);

        controller.mouse_button(MouseButton::Right, ElementState::Pressed);
        controller.mouse_motion((10.0, -10000.0));
        controller.update(&mut camera, 0.016);
        assert!((camera.yaw + 10.0 * ROTATE_SPEED).abs() < 1e-5);
        assert_eq!(camera.pitch, Camera::MAX_PITCH);
    }

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(command_for(VirtualKeyCode::Tab), Some(Command::ToggleMode));
        assert_eq!(command_for(VirtualKeyCode::G), Some(Command::ToggleGi));
        assert_eq!(command_for(VirtualKeyCode::Key1), Some(Command::DebugView(DebugView::Final)));
        assert_eq!(command_for(VirtualKeyCode::Key9), Some(Command::DebugView(DebugView::MotionVectors)));
        assert_eq!(command_for(VirtualKeyCode::W), None);
    }
}
