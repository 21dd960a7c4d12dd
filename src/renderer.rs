// =============================================================================
// RENDERER - Per-frame state machine
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the fence of this frame slot (its previous submission is done)
// 2. Acquire swapchain image (OUT_OF_DATE -> recreate, skip frame)
// 3. Write this slot's uniform buffer
// 4. Reset fence, re-record this slot's command buffer
// 5. Submit: wait image_available, signal render_finished[image] + fence
// 6. Present, recreating the swapchain if it went stale or the window resized
// 7. Advance to the next frame slot
//
// Swapchain-sized resources live in `SwapchainTargets` and are rebuilt as a
// unit; the render pass and pipeline survive because viewport and scissor
// are dynamic state.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

use crate::assets::{Mesh, TextureData, UniformBufferObject};
use crate::backend::image::create_texture_sampler;
use crate::backend::{
    command, descriptor, pipeline, shader, sync, AcquiredImage, FrameSync, GpuBuffer, GpuImage,
    Swapchain, VulkanDevice,
};
use crate::config::Config;

/// Everything whose size or count follows the swapchain
struct SwapchainTargets {
    framebuffers: Vec<vk::Framebuffer>,
    /// Indexed by swapchain image, not by frame slot
    render_finished: Vec<vk::Semaphore>,
    _depth: GpuImage,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl SwapchainTargets {
    fn new(
        device: &Arc<VulkanDevice>,
        command_pool: vk::CommandPool,
        render_pass: vk::RenderPass,
        swapchain: Swapchain,
    ) -> Result<Self> {
        let depth = GpuImage::depth(device, command_pool, swapchain.extent)?;
        let framebuffers = pipeline::create_framebuffers(
            device,
            &swapchain.image_views,
            depth.view,
            render_pass,
            swapchain.extent,
        )?;
        let render_finished =
            sync::create_render_finished_semaphores(device, swapchain.images.len())?;

        Ok(Self {
            framebuffers,
            render_finished,
            _depth: depth,
            swapchain,
            device: device.clone(),
        })
    }
}

impl Drop for SwapchainTargets {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
        sync::destroy_semaphores(&self.device.device, &mut self.render_finished);
        // depth image and swapchain release themselves
    }
}

/// What a frame does once the swapchain has answered the acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    /// Record, submit and present into this swapchain image
    Render { image_index: u32 },
    /// Swapchain is out of date. Nothing is submitted, the fence stays
    /// signaled and the frame slot does not advance.
    Rebuild,
}

/// Frame slot bookkeeping, kept apart from the Vulkan calls it drives
#[derive(Debug)]
pub struct FrameCursor {
    current: usize,
    frames_in_flight: usize,
    resize_requested: bool,
}

impl FrameCursor {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            current: 0,
            frames_in_flight: frames_in_flight.max(1),
            resize_requested: false,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn step(&self, acquired: AcquiredImage) -> FrameStep {
        match acquired {
            // Suboptimal still renders; present reports it afterwards
            AcquiredImage::Ready { index, .. } => FrameStep::Render { image_index: index },
            AcquiredImage::OutOfDate => FrameStep::Rebuild,
        }
    }

    /// Close a presented frame: move to the next slot and report whether the
    /// swapchain must be rebuilt. Consumes a pending resize request.
    pub fn finish(&mut self, present_stale: bool) -> bool {
        self.current = sync::next_frame(self.current, self.frames_in_flight);
        let rebuild = present_stale || self.resize_requested;
        self.resize_requested = false;
        rebuild
    }
}

/// The render-finished semaphore belonging to an acquired swapchain image
fn render_finished_for(semaphores: &[vk::Semaphore], image_index: u32) -> Result<vk::Semaphore> {
    semaphores
        .get(image_index as usize)
        .copied()
        .ok_or_else(|| anyhow!("Swapchain image index {} out of range", image_index))
}

pub struct Renderer {
    // Dropped before everything below
    targets: Option<SwapchainTargets>,

    uniform_buffers: Vec<GpuBuffer>,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    _texture: GpuImage,

    // Raw handles, destroyed in Drop
    sampler: vk::Sampler,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,

    cursor: FrameCursor,
    present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    start_time: Instant,

    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation, window)?;

        let frames = config.frames_in_flight();
        let present_mode = config.present_mode();
        let extent = window_extent(window);

        let command_pool = command::create_command_pool(&device)?;

        let swapchain = Swapchain::new(device.clone(), present_mode, extent)?;
        let depth_format = device.find_depth_format()?;
        let render_pass = pipeline::create_render_pass(&device, swapchain.format, depth_format)?;
        let targets = SwapchainTargets::new(&device, command_pool, render_pass, swapchain)?;

        // Pipeline
        let descriptor_set_layout = pipeline::create_descriptor_set_layout(&device)?;
        let vert = shader::load_shader_module(&device, &config.assets.vertex_shader)?;
        let frag = shader::load_shader_module(&device, &config.assets.fragment_shader)?;
        let pipeline_result = pipeline::create_graphics_pipeline(
            &device,
            render_pass,
            descriptor_set_layout,
            vert,
            frag,
        );
        // Modules are only needed while the pipeline is built
        unsafe {
            device.device.destroy_shader_module(vert, None);
            device.device.destroy_shader_module(frag, None);
        }
        let (pipeline, pipeline_layout) = pipeline_result?;

        // Assets
        let texture_data = TextureData::load_or_checkerboard(&config.assets.texture_path)?;
        let texture = GpuImage::texture(
            &device,
            command_pool,
            "texture",
            texture_data.width,
            texture_data.height,
            &texture_data.pixels,
        )?;
        let sampler = create_texture_sampler(&device)?;

        let mesh = Mesh::load_or_quads(&config.assets.model_path)?;
        let vertex_buffer = GpuBuffer::device_local_with_data(
            &device,
            command_pool,
            "vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
        )?;
        let index_buffer = GpuBuffer::device_local_with_data(
            &device,
            command_pool,
            "indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
        )?;

        // Per-frame resources
        let uniform_buffers = (0..frames)
            .map(|i| {
                GpuBuffer::with_data(
                    &device,
                    &format!("uniforms {}", i),
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    &[UniformBufferObject::at(0.0, extent)],
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let descriptor_pool = descriptor::create_descriptor_pool(&device, frames as u32)?;
        let descriptor_sets = descriptor::allocate_descriptor_sets(
            &device,
            descriptor_pool,
            descriptor_set_layout,
            &uniform_buffers,
            texture.view,
            sampler,
        )?;

        let command_buffers = command::allocate_command_buffers(&device, command_pool, frames as u32)?;
        let frame_sync = (0..frames)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Vulkan initialized: {} frames in flight, {} indices",
            frames,
            mesh.indices.len()
        );

        Ok(Self {
            targets: Some(targets),
            uniform_buffers,
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            _texture: texture,
            sampler,
            descriptor_pool,
            descriptor_sets,
            descriptor_set_layout,
            pipeline,
            pipeline_layout,
            render_pass,
            command_pool,
            command_buffers,
            frame_sync,
            cursor: FrameCursor::new(frames),
            present_mode,
            clear_color: config.graphics.clear_color,
            start_time: Instant::now(),
            device,
        })
    }

    /// Flag that the window changed size; handled after the next present
    pub fn request_resize(&mut self) {
        self.cursor.request_resize();
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    /// Render and present one frame.
    ///
    /// Returns `false` when nothing was submitted: the window is minimized or
    /// the swapchain had to be rebuilt first.
    pub fn draw_frame(&mut self, window_size: vk::Extent2D) -> Result<bool> {
        if is_minimized(window_size) {
            return Ok(false);
        }

        let frame = self.cursor.current();
        let frame_sync = &self.frame_sync[frame];

        unsafe {
            self.device
                .device
                .wait_for_fences(&[frame_sync.in_flight_fence], true, u64::MAX)
                .context("Failed to wait for in-flight fence")?;
        }

        let targets = self.targets.as_ref().context("Swapchain not initialized")?;
        let acquired = targets
            .swapchain
            .acquire_next_image(u64::MAX, frame_sync.image_available)?;
        let image_index = match self.cursor.step(acquired) {
            FrameStep::Render { image_index } => image_index,
            FrameStep::Rebuild => {
                // Fence was not reset, so the next wait on this slot still passes
                if !self.recreate_swapchain(window_size)? {
                    self.cursor.request_resize();
                }
                return Ok(false);
            }
        };

        let ubo = UniformBufferObject::at(
            self.start_time.elapsed().as_secs_f32(),
            targets.swapchain.extent,
        );
        self.uniform_buffers[frame].write(&[ubo])?;

        let cmd = self.command_buffers[frame];
        unsafe {
            self.device
                .device
                .reset_fences(&[frame_sync.in_flight_fence])
                .context("Failed to reset in-flight fence")?;
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
        }
        self.record_command_buffer(cmd, targets, image_index as usize)?;

        let wait_semaphores = [frame_sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished_for(&targets.render_finished, image_index)?];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    frame_sync.in_flight_fence,
                )
                .context("Failed to submit draw command buffer")?;
        }

        let stale = targets.swapchain.present(
            self.device.present_queue,
            image_index,
            &signal_semaphores,
        )?;

        if self.cursor.finish(stale) && !self.recreate_swapchain(window_size)? {
            // Try again once the surface has an area
            self.cursor.request_resize();
        }
        Ok(true)
    }

    /// Rebuild everything sized by the swapchain.
    ///
    /// Returns `false` without touching the current swapchain while either
    /// the window or the surface has zero size.
    pub fn recreate_swapchain(&mut self, window_size: vk::Extent2D) -> Result<bool> {
        if is_minimized(window_size) {
            return Ok(false);
        }

        self.device.wait_idle()?;

        let Some(extent) = Swapchain::surface_extent(&self.device, window_size)? else {
            log::debug!("Surface extent is zero, deferring swapchain recreation");
            return Ok(false);
        };

        // The surface only supports one swapchain at a time
        self.targets = None;
        let swapchain = Swapchain::new(self.device.clone(), self.present_mode, window_size)?;
        self.targets = Some(SwapchainTargets::new(
            &self.device,
            self.command_pool,
            self.render_pass,
            swapchain,
        )?);

        log::info!(
            "Recreated swapchain at {}x{} ({:?})",
            extent.width,
            extent.height,
            self.present_mode
        );
        Ok(true)
    }

    fn record_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        targets: &SwapchainTargets,
        image_index: usize,
    ) -> Result<()> {
        let d = &self.device.device;
        let extent = targets.swapchain.extent;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(targets.framebuffers[image_index])
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            d.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::builder())
                .context("Failed to begin command buffer")?;

            d.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[render_area]);

            d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            d.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[self.descriptor_sets[self.cursor.current()]],
                &[],
            );

            d.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            d.cmd_end_render_pass(cmd);

            d.end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("{:#}", e);
        }

        self.targets = None;

        let d = &self.device.device;
        unsafe {
            for frame_sync in &self.frame_sync {
                frame_sync.destroy(d);
            }
            // Also frees the command buffers
            d.destroy_command_pool(self.command_pool, None);
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            d.destroy_render_pass(self.render_pass, None);
            // Also frees the descriptor sets
            d.destroy_descriptor_pool(self.descriptor_pool, None);
            d.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            d.destroy_sampler(self.sampler, None);
        }
        // Buffers, texture and finally the device drop with the fields
    }
}

pub fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

pub fn is_minimized(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_windows_count_as_minimized() {
        assert!(is_minimized(vk::Extent2D { width: 0, height: 600 }));
        assert!(is_minimized(vk::Extent2D { width: 800, height: 0 }));
        assert!(!is_minimized(vk::Extent2D { width: 1, height: 1 }));
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_advancing() {
        let mut cursor = FrameCursor::new(2);
        cursor.finish(false);
        assert_eq!(cursor.current(), 1);

        assert_eq!(cursor.step(AcquiredImage::OutOfDate), FrameStep::Rebuild);
        // Same slot is waited on again for the retried frame
        assert_eq!(cursor.current(), 1);
    }

    #[test]
    fn suboptimal_image_is_still_rendered() {
        let cursor = FrameCursor::new(2);
        assert_eq!(
            cursor.step(AcquiredImage::Ready { index: 2, suboptimal: true }),
            FrameStep::Render { image_index: 2 }
        );
    }

    #[test]
    fn resize_request_rebuilds_once_after_present() {
        let mut cursor = FrameCursor::new(2);
        cursor.request_resize();

        assert!(cursor.finish(false));
        assert_eq!(cursor.current(), 1);

        // Flag was cleared by the rebuild
        assert!(!cursor.finish(false));
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn stale_present_rebuilds() {
        let mut cursor = FrameCursor::new(3);
        assert!(cursor.finish(true));
        assert!(!cursor.finish(false));
        assert!(!cursor.finish(false));
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn zero_frames_in_flight_keeps_one_slot() {
        let mut cursor = FrameCursor::new(0);
        cursor.finish(false);
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn render_finished_follows_image_not_frame_slot() {
        use ash::vk::Handle;

        let semaphores: Vec<vk::Semaphore> = (10..13).map(vk::Semaphore::from_raw).collect();
        let cursor = FrameCursor::new(2);
        assert_eq!(cursor.current(), 0);

        let FrameStep::Render { image_index } =
            cursor.step(AcquiredImage::Ready { index: 2, suboptimal: false })
        else {
            panic!("expected a renderable image");
        };
        assert_eq!(render_finished_for(&semaphores, image_index).unwrap().as_raw(), 12);
        assert!(render_finished_for(&semaphores, 3).is_err());
    }
}
