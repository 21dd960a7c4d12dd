// Assets - everything the renderer uploads to the GPU

pub mod mesh;
pub mod texture;
pub mod uniform;

pub use mesh::{Mesh, Vertex};
pub use texture::TextureData;
pub use uniform::UniformBufferObject;
