//! Compilation context shared by the render thread and the compiler threads.
//!
//! Everything a PSO build needs that is not part of the request itself: the
//! backend device, the shader asset library and the process-wide shader
//! cache manager. Owned by the [`RendererRuntime`] and handed to the compiler
//! as an `Arc`; there are no process-wide statics.
//!
//! [`RendererRuntime`]: crate::renderer::RendererRuntime

use std::sync::Arc;

use crate::backend::{RenderDevice, ShaderType};
use crate::renderer::pipeline::pipeline_id::ShaderCacheId;
use crate::renderer::pipeline::shader_cache::ShaderCacheManager;
use crate::resources::ShaderAssetLibrary;

pub struct CompilationContext {
    device: Arc<dyn RenderDevice>,
    library: Arc<ShaderAssetLibrary>,
    shader_cache_manager: ShaderCacheManager,
    debug_print_generated_source: bool,
}

impl CompilationContext {
    #[must_use]
    pub fn new(
        device: Arc<dyn RenderDevice>,
        library: Arc<ShaderAssetLibrary>,
        debug_print_generated_source: bool,
    ) -> Self {
        Self {
            device,
            library,
            shader_cache_manager: ShaderCacheManager::new(),
            debug_print_generated_source,
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &dyn RenderDevice {
        self.device.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn shared_device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn library(&self) -> &ShaderAssetLibrary {
        &self.library
    }

    #[inline]
    #[must_use]
    pub fn shader_cache_manager(&self) -> &ShaderCacheManager {
        &self.shader_cache_manager
    }

    pub(crate) fn debug_print_source(
        &self,
        shader_cache_id: ShaderCacheId,
        shader_type: ShaderType,
        source_code: &str,
    ) {
        if !self.debug_print_generated_source {
            return;
        }

        fn normalize_newlines(s: &str) -> String {
            let mut result = String::with_capacity(s.len());
            let mut last_was_newline = false;
            for c in s.chars() {
                if c == '\n' {
                    if !last_was_newline {
                        result.push('\n');
                        last_was_newline = true;
                    }
                } else {
                    result.push(c);
                    last_was_newline = false;
                }
            }
            result
        }

        log::debug!(
            "================= Generated {shader_type} Shader {shader_cache_id} ==================\n{}",
            normalize_newlines(source_code)
        );
    }
}
