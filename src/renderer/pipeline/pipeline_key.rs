//! Fixed-function pipeline state.
//!
//! `wgpu` descriptor types (`ColorTargetState`, `DepthStencilState`, …) do not
//! implement `Hash` / `Eq`. This module defines *mirror* types that extract the
//! fields relevant for pipeline identity and derive the correct trait impls.
//!
//! [`PipelineState`] is the part of a PSO owned by the material blueprint
//! (topology, rasterizer, depth-stencil, blend targets, multisample). Its
//! [`serialized_hash`](PipelineState::serialized_hash) is folded into every
//! pipeline state signature.

use smallvec::{SmallVec, smallvec};

use crate::utils::hash::fnv_hash_key;

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl From<wgpu::BlendComponent> for BlendComponentKey {
    fn from(b: wgpu::BlendComponent) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

impl From<BlendComponentKey> for wgpu::BlendComponent {
    fn from(b: BlendComponentKey) -> Self {
        Self {
            src_factor: b.src_factor,
            dst_factor: b.dst_factor,
            operation: b.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl From<wgpu::BlendState> for BlendStateKey {
    fn from(b: wgpu::BlendState) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

impl From<BlendStateKey> for wgpu::BlendState {
    fn from(b: BlendStateKey) -> Self {
        Self {
            color: b.color.into(),
            alpha: b.alpha.into(),
        }
    }
}

/// Hashable mirror of `wgpu::ColorTargetState`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColorTargetKey {
    pub format: wgpu::TextureFormat,
    pub blend: Option<BlendStateKey>,
    pub write_mask: u32, // wgpu::ColorWrites bits
}

impl From<wgpu::ColorTargetState> for ColorTargetKey {
    fn from(c: wgpu::ColorTargetState) -> Self {
        Self {
            format: c.format,
            blend: c.blend.map(Into::into),
            write_mask: c.write_mask.bits(),
        }
    }
}

impl From<&ColorTargetKey> for wgpu::ColorTargetState {
    fn from(c: &ColorTargetKey) -> Self {
        Self {
            format: c.format,
            blend: c.blend.map(Into::into),
            write_mask: wgpu::ColorWrites::from_bits_truncate(c.write_mask),
        }
    }
}

/// Hashable mirror of `wgpu::StencilFaceState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceKey {
    pub compare: wgpu::CompareFunction,
    pub fail_op: wgpu::StencilOperation,
    pub depth_fail_op: wgpu::StencilOperation,
    pub pass_op: wgpu::StencilOperation,
}

impl From<wgpu::StencilFaceState> for StencilFaceKey {
    fn from(s: wgpu::StencilFaceState) -> Self {
        Self {
            compare: s.compare,
            fail_op: s.fail_op,
            depth_fail_op: s.depth_fail_op,
            pass_op: s.pass_op,
        }
    }
}

impl From<StencilFaceKey> for wgpu::StencilFaceState {
    fn from(s: StencilFaceKey) -> Self {
        Self {
            compare: s.compare,
            fail_op: s.fail_op,
            depth_fail_op: s.depth_fail_op,
            pass_op: s.pass_op,
        }
    }
}

/// Hashable mirror of `wgpu::StencilState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilStateKey {
    pub front: StencilFaceKey,
    pub back: StencilFaceKey,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl From<wgpu::StencilState> for StencilStateKey {
    fn from(s: wgpu::StencilState) -> Self {
        Self {
            front: s.front.into(),
            back: s.back.into(),
            read_mask: s.read_mask,
            write_mask: s.write_mask,
        }
    }
}

impl From<StencilStateKey> for wgpu::StencilState {
    fn from(s: StencilStateKey) -> Self {
        Self {
            front: s.front.into(),
            back: s.back.into(),
            read_mask: s.read_mask,
            write_mask: s.write_mask,
        }
    }
}

/// Hashable mirror of `wgpu::DepthBiasState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthBiasKey {
    pub constant: i32,
    pub slope_scale_bits: u32,
    pub clamp_bits: u32,
}

impl From<wgpu::DepthBiasState> for DepthBiasKey {
    fn from(b: wgpu::DepthBiasState) -> Self {
        Self {
            constant: b.constant,
            slope_scale_bits: b.slope_scale.to_bits(),
            clamp_bits: b.clamp.to_bits(),
        }
    }
}

impl From<DepthBiasKey> for wgpu::DepthBiasState {
    fn from(b: DepthBiasKey) -> Self {
        Self {
            constant: b.constant,
            slope_scale: f32::from_bits(b.slope_scale_bits),
            clamp: f32::from_bits(b.clamp_bits),
        }
    }
}

/// Hashable mirror of `wgpu::DepthStencilState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilKey {
    pub format: wgpu::TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub stencil: StencilStateKey,
    pub bias: DepthBiasKey,
}

impl From<wgpu::DepthStencilState> for DepthStencilKey {
    fn from(d: wgpu::DepthStencilState) -> Self {
        Self {
            format: d.format,
            depth_write_enabled: d.depth_write_enabled,
            depth_compare: d.depth_compare,
            stencil: d.stencil.into(),
            bias: d.bias.into(),
        }
    }
}

impl From<DepthStencilKey> for wgpu::DepthStencilState {
    fn from(d: DepthStencilKey) -> Self {
        Self {
            format: d.format,
            depth_write_enabled: d.depth_write_enabled,
            depth_compare: d.depth_compare,
            stencil: d.stencil.into(),
            bias: d.bias.into(),
        }
    }
}

/// Hashable mirror of `wgpu::MultisampleState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultisampleKey {
    pub count: u32,
    pub mask: u64,
    pub alpha_to_coverage_enabled: bool,
}

impl From<wgpu::MultisampleState> for MultisampleKey {
    fn from(m: wgpu::MultisampleState) -> Self {
        Self {
            count: m.count,
            mask: m.mask,
            alpha_to_coverage_enabled: m.alpha_to_coverage_enabled,
        }
    }
}

impl From<MultisampleKey> for wgpu::MultisampleState {
    fn from(m: MultisampleKey) -> Self {
        Self {
            count: m.count,
            mask: m.mask,
            alpha_to_coverage_enabled: m.alpha_to_coverage_enabled,
        }
    }
}

/// Rasterizer part of `wgpu::PrimitiveState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerStateKey {
    pub cull_mode: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub polygon_mode: wgpu::PolygonMode,
    pub unclipped_depth: bool,
}

impl Default for RasterizerStateKey {
    fn default() -> Self {
        Self {
            cull_mode: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
        }
    }
}

// ─── Pipeline State ───────────────────────────────────────────────────────────

/// Fixed-function state of a PSO.
///
/// The default is an opaque, back-face culled triangle list rendering into one
/// sRGB color target with a `Depth32Float` depth buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub topology: wgpu::PrimitiveTopology,
    pub rasterizer: RasterizerStateKey,
    pub depth_stencil: Option<DepthStencilKey>,
    pub color_targets: SmallVec<[ColorTargetKey; 2]>,
    pub multisample: MultisampleKey,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            topology: wgpu::PrimitiveTopology::TriangleList,
            rasterizer: RasterizerStateKey::default(),
            depth_stencil: Some(
                wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }
                .into(),
            ),
            color_targets: smallvec![ColorTargetKey {
                format: wgpu::TextureFormat::Bgra8UnormSrgb,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL.bits(),
            }],
            multisample: wgpu::MultisampleState::default().into(),
        }
    }
}

impl PipelineState {
    /// Stable hash of the whole state, folded into pipeline state signatures.
    #[must_use]
    pub fn serialized_hash(&self) -> u32 {
        fnv_hash_key(self)
    }

    #[must_use]
    pub fn with_topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub fn with_cull_mode(mut self, cull_mode: Option<wgpu::Face>) -> Self {
        self.rasterizer.cull_mode = cull_mode;
        self
    }

    #[must_use]
    pub fn with_depth_stencil(mut self, depth_stencil: Option<wgpu::DepthStencilState>) -> Self {
        self.depth_stencil = depth_stencil.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_color_targets(mut self, targets: &[wgpu::ColorTargetState]) -> Self {
        self.color_targets = targets.iter().cloned().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_blend(mut self, blend: Option<wgpu::BlendState>) -> Self {
        for target in &mut self.color_targets {
            target.blend = blend.map(Into::into);
        }
        self
    }

    #[must_use]
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.multisample.count = count;
        self
    }

    #[must_use]
    pub fn primitive(&self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: self.topology,
            front_face: self.rasterizer.front_face,
            cull_mode: self.rasterizer.cull_mode,
            polygon_mode: self.rasterizer.polygon_mode,
            unclipped_depth: self.rasterizer.unclipped_depth,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn wgpu_depth_stencil(&self) -> Option<wgpu::DepthStencilState> {
        self.depth_stencil.map(Into::into)
    }

    #[must_use]
    pub fn wgpu_color_targets(&self) -> Vec<Option<wgpu::ColorTargetState>> {
        self.color_targets.iter().map(|t| Some(t.into())).collect()
    }

    #[must_use]
    pub fn wgpu_multisample(&self) -> wgpu::MultisampleState {
        self.multisample.into()
    }
}
