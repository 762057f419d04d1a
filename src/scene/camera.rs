//! Camera and per-frame scene data

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Camera projection type.
///
/// Depth is reversed (near maps to 1, far to 0) to match the mesh pipelines'
/// greater-or-equal depth test.
#[derive(Debug, Clone, Copy)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: 70f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 10000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            // Swapping near and far yields reversed depth
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, far, near),
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        let Projection::Perspective { aspect: a, .. } = self;
        *a = aspect;
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Update aspect ratio for perspective projection
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        self.projection.set_aspect(width / height);
    }

    /// Build this frame's scene-data record with default lighting
    pub fn scene_data(&self) -> SceneData {
        SceneData::new(self, SceneLighting::default())
    }
}

/// Ambient and directional light for one frame
#[derive(Debug, Clone, Copy)]
pub struct SceneLighting {
    pub ambient_color: Vec4,
    /// Direction the sun shines towards; `w` is the sun's intensity
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl Default for SceneLighting {
    fn default() -> Self {
        Self {
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, -1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }
}

/// Per-frame record the scene-data table points at: camera matrices,
/// lighting and camera position
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub ambient_color: Vec4,
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
    pub camera_position: Vec4,
}

impl SceneData {
    pub fn new(camera: &Camera, lighting: SceneLighting) -> Self {
        let view = camera.view_matrix();
        let proj = camera.projection_matrix();
        Self {
            view,
            proj,
            view_proj: proj * view,
            ambient_color: lighting.ambient_color,
            sunlight_direction: lighting.sunlight_direction,
            sunlight_color: lighting.sunlight_color,
            camera_position: camera.position.extend(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_depth() {
        let projection = Projection::perspective(60.0, 1.0, 0.1, 100.0);
        let m = projection.matrix();
        let near = m.project_point3(Vec3::new(0.0, 0.0, -0.1));
        let far = m.project_point3(Vec3::new(0.0, 0.0, -100.0));
        assert!((near.z - 1.0).abs() < 1e-4);
        assert!(far.z.abs() < 1e-4);
    }

    #[test]
    fn test_scene_data_layout() {
        assert_eq!(std::mem::size_of::<SceneData>(), 3 * 64 + 4 * 16);

        let camera = Camera::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO);
        let data = camera.scene_data();
        assert_eq!(data.camera_position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert!(data.view_proj.abs_diff_eq(data.proj * data.view, 1e-6));
    }
}
