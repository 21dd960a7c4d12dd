// Synchronization primitives
//
// Per frame in flight: an image-available semaphore and a fence guarding the
// frame's command buffer and uniform buffer. Render-finished semaphores are
// keyed by swapchain image instead, since presentation of an image may still
// be waiting on one after its frame slot has come around again.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        // Signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        Ok(Self {
            image_available: create_semaphore(device)?,
            in_flight_fence: unsafe { device.device.create_fence(&fence_info, None) }
                .context("Failed to create in-flight fence")?,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

pub fn create_semaphore(device: &VulkanDevice) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.device.create_semaphore(&semaphore_info, None) }
        .context("Failed to create semaphore")
}

/// One render-finished semaphore per swapchain image
pub fn create_render_finished_semaphores(
    device: &VulkanDevice,
    image_count: usize,
) -> Result<Vec<vk::Semaphore>> {
    (0..image_count).map(|_| create_semaphore(device)).collect()
}

pub fn destroy_semaphores(device: &ash::Device, semaphores: &mut Vec<vk::Semaphore>) {
    for semaphore in semaphores.drain(..) {
        unsafe { device.destroy_semaphore(semaphore, None) };
    }
}

/// Index of the frame slot used after `current`
pub fn next_frame(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_cycles_through_slots() {
        let mut frame = 0;
        let visited: Vec<usize> = (0..5)
            .map(|_| {
                frame = next_frame(frame, 2);
                frame
            })
            .collect();
        assert_eq!(visited, vec![1, 0, 1, 0, 1]);
    }

    #[test]
    fn single_frame_in_flight_stays_at_zero() {
        assert_eq!(next_frame(0, 1), 0);
    }
}
