// Per-frame transform block, laid out for std140 (three column-major mat4)

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

const DEGREES_PER_SECOND: f32 = 90.0;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Transforms `elapsed` seconds after startup for a target of size `extent`
    pub fn at(elapsed: f32, extent: vk::Extent2D) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;

        let model = Mat4::from_rotation_z((elapsed * DEGREES_PER_SECOND).to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        // glam already maps depth to [0, 1]; Vulkan's clip space has Y pointing down
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn block_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
    }

    #[test]
    fn model_starts_unrotated_and_turns_a_quarter_per_second() {
        assert_eq!(UniformBufferObject::at(0.0, EXTENT).model, Mat4::IDENTITY);

        let x = UniformBufferObject::at(1.0, EXTENT)
            .model
            .transform_point3(Vec3::X);
        assert!(x.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn origin_lands_inside_the_depth_range() {
        let ubo = UniformBufferObject::at(0.0, EXTENT);
        let clip = ubo.proj * ubo.view * ubo.model * Vec3::ZERO.extend(1.0);

        assert!(clip.w > 0.0);
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth < 1.0);
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
    }

    #[test]
    fn projection_flips_y_and_tracks_aspect() {
        let ubo = UniformBufferObject::at(0.0, EXTENT);
        assert!(ubo.proj.y_axis.y < 0.0);

        let ratio = -ubo.proj.y_axis.y / ubo.proj.x_axis.x;
        assert!((ratio - 800.0 / 600.0).abs() < 1e-4);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let ubo = UniformBufferObject::at(0.0, vk::Extent2D { width: 10, height: 0 });
        assert!(ubo.proj.is_finite());
    }
}
