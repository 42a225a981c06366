pub mod barrier;
pub mod buffer;
pub mod command;
pub mod contexts;
pub mod debug;
pub mod descriptor;
pub mod error;
pub mod frame_ring;
pub mod image;
pub mod ping_pong;
pub mod pipeline;
pub mod push_constants;
pub mod shader;
pub mod std140;

pub use barrier::{Access, BarrierRecorder};
pub use buffer::AllocatedBuffer;
pub use contexts::{RenderContext, VulkanContext};
pub use descriptor::{DescriptorResource, DescriptorSetSchema, DescriptorSets};
pub use error::{VkError, VkResultExt};
pub use image::AllocatedImage;
pub use ping_pong::PingPong;
pub use pipeline::{ComputePipeline, GraphicsPipeline};
