// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Resources that own GPU memory hold an
// Arc<VulkanDevice> and release themselves on drop.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::GpuBuffer;
pub use device::VulkanDevice;
pub use image::GpuImage;
pub use swapchain::{AcquiredImage, Swapchain};
pub use sync::FrameSync;
