pub mod renderer;
pub mod vulkan;

pub use renderer::{RenderRequest, Renderer, TracingRenderer};
pub use vulkan::VulkanContext;
