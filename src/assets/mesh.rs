// Mesh data: vertex layout and OBJ loading
//
// Vertices are de-duplicated by bit pattern so the index buffer only
// references unique vertices.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::io::BufRead;
use std::mem::{offset_of, size_of};
use std::path::Path;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0, 1 and 2: position, color, texture coordinate
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }

    // f32 has no Eq/Hash, so vertices are keyed by their raw bits
    fn key(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }
}

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Indexed triangle list
#[derive(Debug, Default, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn load_obj(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open model {:?}", path))?;
        let mut reader = std::io::BufReader::new(file);

        let mesh = Self::load_obj_buf(&mut reader)
            .with_context(|| format!("Failed to load model {:?}", path))?;

        log::info!(
            "Loaded model {:?}: {} vertices, {} indices",
            path,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ text. Materials are ignored; the texture comes from config.
    pub fn load_obj_buf<R: BufRead>(reader: &mut R) -> Result<Self> {
        let options = tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        };

        let (models, _) = tobj::load_obj_buf(reader, &options, |_| Ok(Default::default()))
            .context("Failed to parse OBJ data")?;

        let mut mesh = Mesh::default();
        let mut unique = HashMap::new();

        for model in &models {
            let positions = &model.mesh.positions;
            let texcoords = &model.mesh.texcoords;

            for &index in &model.mesh.indices {
                let i = index as usize;
                let pos = positions
                    .get(3 * i..3 * i + 3)
                    .with_context(|| format!("Index {} out of range in '{}'", index, model.name))?;

                let tex_coord = match texcoords.get(2 * i..2 * i + 2) {
                    Some(uv) => [uv[0], 1.0 - uv[1]],
                    None => [0.0, 0.0],
                };

                mesh.push(Vertex::new([pos[0], pos[1], pos[2]], WHITE, tex_coord), &mut unique);
            }
        }

        if mesh.indices.is_empty() {
            anyhow::bail!("Model contains no triangles");
        }

        Ok(mesh)
    }

    fn push(&mut self, vertex: Vertex, unique: &mut HashMap<[u32; 8], u32>) {
        let index = *unique.entry(vertex.key()).or_insert_with(|| {
            self.vertices.push(vertex);
            (self.vertices.len() - 1) as u32
        });
        self.indices.push(index);
    }

    /// Two stacked textured quads
    pub fn quads() -> Self {
        let mut vertices = Vec::with_capacity(8);
        for z in [0.0, -0.5] {
            vertices.extend_from_slice(&[
                Vertex::new([-0.5, -0.5, z], [1.0, 0.0, 0.0], [1.0, 0.0]),
                Vertex::new([0.5, -0.5, z], [0.0, 1.0, 0.0], [0.0, 0.0]),
                Vertex::new([0.5, 0.5, z], [0.0, 0.0, 1.0], [0.0, 1.0]),
                Vertex::new([-0.5, 0.5, z], [1.0, 1.0, 1.0], [1.0, 1.0]),
            ]);
        }

        Self {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }

    /// Load `path`, or fall back to the built-in quads when it is missing
    pub fn load_or_quads(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_obj(path)
        } else {
            log::warn!("Model {:?} not found, drawing built-in quads", path);
            Ok(Self::quads())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SQUARE: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3
f 3/3 4/4 1/1
";

    fn parse(obj: &str) -> Result<Mesh> {
        Mesh::load_obj_buf(&mut Cursor::new(obj.as_bytes()))
    }

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 32);

        let attributes = Vertex::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn shared_corners_are_deduplicated() {
        let mesh = parse(SQUARE).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn texture_v_is_flipped_and_color_is_white() {
        let mesh = parse(SQUARE).unwrap();
        assert_eq!(mesh.vertices[0].tex_coord, [0.0, 1.0]);
        assert_eq!(mesh.vertices[2].tex_coord, [1.0, 0.0]);
        assert!(mesh.vertices.iter().all(|v| v.color == WHITE));
    }

    #[test]
    fn missing_texcoords_default_to_origin() {
        let mesh = parse("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert!(mesh.vertices.iter().all(|v| v.tex_coord == [0.0, 0.0]));
    }

    #[test]
    fn quads_are_triangulated_into_faces() {
        let mesh = Mesh::quads();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices.len(), 12);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn empty_model_is_rejected() {
        assert!(parse("# nothing here\n").is_err());
    }

    #[test]
    fn missing_model_falls_back_to_quads() {
        let mesh = Mesh::load_or_quads(Path::new("no/such/model.obj")).unwrap();
        assert_eq!(mesh.indices.len(), 12);
    }
}
