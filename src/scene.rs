// Scene data
//
// The host-side inputs the frame loop consumes: the interleaved vertex
// layout, the per-image uniform block, the draw list and raw RGBA texture
// bytes. Nothing here touches the device.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem::{offset_of, size_of};
use crate::backend::shader::ShaderCode;

/// Interleaved position, colour and texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 2], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }

    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Locations 0..=2 match `shaders/mesh.vert`.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
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
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// Model, view and projection, laid out as the shader's `std140` block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBlock {
    /// `rotation` is in quarter turns about Z. The projection is flipped
    /// in Y since Vulkan clip space points down.
    pub fn new(rotation: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(rotation * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

/// One indexed draw sampling one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawItem {
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    /// Index into the renderer's texture list.
    pub texture: usize,
}

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let rgba = color.repeat(width as usize * height as usize);
        Self { width, height, rgba }
    }

    /// Alternating `cell`-pixel squares, `a` in the top-left corner.
    pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let even = ((x / cell) + (y / cell)) % 2 == 0;
                rgba.extend_from_slice(if even { &a } else { &b });
            }
        }
        Self {
            width: size,
            height: size,
            rgba,
        }
    }
}

/// Everything the renderer uploads once at construction.
#[derive(Debug, Clone)]
pub struct FrameAssets {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
    pub textures: Vec<TextureData>,
    pub draws: Vec<DrawItem>,
    pub shaders: ShaderCode,
}

/// A textured quad and a triangle, drawn with two different textures.
pub fn demo_geometry() -> (Vec<Vertex>, Vec<u16>, Vec<DrawItem>) {
    let vertices = vec![
        Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
        Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
        Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
        Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
        Vertex::new([0.2, 0.2], [1.0, 1.0, 1.0], [1.0, 1.0]),
        Vertex::new([0.9, -0.9], [1.0, 1.0, 1.0], [0.0, 0.0]),
        Vertex::new([0.9, 0.9], [1.0, 1.0, 1.0], [0.0, 1.0]),
    ];
    let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6];
    let draws = vec![
        DrawItem {
            first_index: 0,
            index_count: 6,
            vertex_offset: 0,
            texture: 0,
        },
        DrawItem {
            first_index: 6,
            index_count: 3,
            vertex_offset: 0,
            texture: 1,
        },
    ];
    (vertices, indices, draws)
}

/// Two procedural textures standing in for decoded image files.
pub fn demo_textures() -> Vec<TextureData> {
    vec![
        TextureData::checkerboard(64, 8, [255, 255, 255, 255], [40, 40, 40, 255]),
        TextureData::checkerboard(64, 16, [230, 120, 30, 255], [30, 60, 200, 255]),
    ]
}
