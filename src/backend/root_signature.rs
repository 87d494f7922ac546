//! Root signature: the bind group layouts a program is linked against.

/// One bind group layout, stored by value so it can be hashed and shared
/// across threads without holding a live `wgpu::BindGroupLayout`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BindGroupLayoutDesc {
    pub label: Option<String>,
    pub entries: Vec<wgpu::BindGroupLayoutEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RootSignature {
    bind_group_layouts: Vec<BindGroupLayoutDesc>,
}

impl RootSignature {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bind_group_layout(
        mut self,
        label: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        self.bind_group_layouts.push(BindGroupLayoutDesc {
            label: Some(label.to_string()),
            entries: entries.to_vec(),
        });
        self
    }

    #[inline]
    #[must_use]
    pub fn bind_group_layouts(&self) -> &[BindGroupLayoutDesc] {
        &self.bind_group_layouts
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bind_group_layouts.is_empty()
    }
}
