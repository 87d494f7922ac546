//! Vertex Attributes
//!
//! Describes the vertex input of a material blueprint: wgpu vertex buffer
//! layouts plus the matching WGSL `VertexInput` struct, which can be handed to
//! the shader builder as a dynamic shader piece.

use wgpu::VertexFormat;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnedVertexBufferDesc {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
    pub attribute_names: Vec<String>,
}

impl OwnedVertexBufferDesc {
    #[must_use]
    pub fn as_wgpu(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: &self.attributes,
        }
    }
}

/// Ordered set of vertex buffers. Shader locations are assigned sequentially
/// across buffers in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexAttributes {
    buffers: Vec<OwnedVertexBufferDesc>,
}

impl VertexAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tightly packed buffer; offsets and stride come from the
    /// attribute formats.
    #[must_use]
    pub fn with_buffer(
        mut self,
        step_mode: wgpu::VertexStepMode,
        attributes: &[(&str, VertexFormat)],
    ) -> Self {
        let mut location = self.number_of_attributes() as u32;
        let mut offset = 0;
        let mut wgpu_attributes = Vec::with_capacity(attributes.len());
        let mut attribute_names = Vec::with_capacity(attributes.len());

        for (name, format) in attributes {
            wgpu_attributes.push(wgpu::VertexAttribute {
                format: *format,
                offset,
                shader_location: location,
            });
            attribute_names.push((*name).to_string());
            offset += format.size();
            location += 1;
        }

        self.buffers.push(OwnedVertexBufferDesc {
            array_stride: offset,
            step_mode,
            attributes: wgpu_attributes,
            attribute_names,
        });
        self
    }

    #[inline]
    #[must_use]
    pub fn buffers(&self) -> &[OwnedVertexBufferDesc] {
        &self.buffers
    }

    #[must_use]
    pub fn number_of_attributes(&self) -> usize {
        self.buffers.iter().map(|b| b.attributes.len()).sum()
    }

    #[must_use]
    pub fn wgpu_layouts(&self) -> Vec<wgpu::VertexBufferLayout<'_>> {
        self.buffers.iter().map(OwnedVertexBufferDesc::as_wgpu).collect()
    }

    /// WGSL `VertexInput` struct matching the buffer layouts.
    #[must_use]
    pub fn vertex_input_code(&self) -> String {
        let mut fields = Vec::with_capacity(self.number_of_attributes());
        for buffer in &self.buffers {
            for (attribute, name) in buffer.attributes.iter().zip(&buffer.attribute_names) {
                let wgsl_type = format_to_wgsl_type(attribute.format);
                fields.push(format!(
                    "    @location({}) {name}: {wgsl_type},",
                    attribute.shader_location
                ));
            }
        }
        format!("struct VertexInput {{\n{}\n}};", fields.join("\n"))
    }
}

#[allow(clippy::match_same_arms)]
fn format_to_wgsl_type(format: VertexFormat) -> &'static str {
    match format {
        VertexFormat::Float32 => "f32",
        VertexFormat::Float32x2 => "vec2<f32>",
        VertexFormat::Float32x3 => "vec3<f32>",
        VertexFormat::Float32x4 => "vec4<f32>",
        VertexFormat::Uint32 => "u32",
        VertexFormat::Uint32x2 => "vec2<u32>",
        VertexFormat::Uint32x3 => "vec3<u32>",
        VertexFormat::Uint32x4 => "vec4<u32>",
        VertexFormat::Sint32 => "i32",
        VertexFormat::Sint32x2 => "vec2<i32>",
        VertexFormat::Sint32x3 => "vec3<i32>",
        VertexFormat::Sint32x4 => "vec4<i32>",
        VertexFormat::Unorm8x4 | VertexFormat::Snorm8x4 => "vec4<f32>",
        VertexFormat::Unorm16x2 | VertexFormat::Snorm16x2 => "vec2<f32>",
        VertexFormat::Unorm16x4 | VertexFormat::Snorm16x4 => "vec4<f32>",
        VertexFormat::Uint8x4 | VertexFormat::Uint16x4 => "vec4<u32>",
        VertexFormat::Sint8x4 | VertexFormat::Sint16x4 => "vec4<i32>",
        _ => "f32",
    }
}
