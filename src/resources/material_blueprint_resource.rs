//! Material Blueprint Resources
//!
//! A registered material blueprint together with its pipeline state cache
//! manager. The [`MaterialBlueprintResourceManager`] is the routing table the
//! compiler's dispatch uses to find the cache a finished PSO belongs to.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::backend::RenderDevice;
use crate::renderer::pipeline::cache::PipelineStateCacheManager;
use crate::renderer::pipeline::compiler::{CompiledPipelineState, PipelineStateCompiler};
use crate::resources::MaterialBlueprint;
use crate::utils::AssetId;

pub struct MaterialBlueprintResource {
    material_blueprint: Arc<MaterialBlueprint>,
    pipeline_state_cache_manager: PipelineStateCacheManager,
}

impl MaterialBlueprintResource {
    #[must_use]
    pub fn new(material_blueprint: Arc<MaterialBlueprint>) -> Self {
        Self {
            pipeline_state_cache_manager: PipelineStateCacheManager::new(Arc::clone(&material_blueprint)),
            material_blueprint,
        }
    }

    #[inline]
    #[must_use]
    pub fn material_blueprint(&self) -> &Arc<MaterialBlueprint> {
        &self.material_blueprint
    }

    #[inline]
    #[must_use]
    pub fn pipeline_state_cache_manager(&self) -> &PipelineStateCacheManager {
        &self.pipeline_state_cache_manager
    }

    #[inline]
    pub fn pipeline_state_cache_manager_mut(&mut self) -> &mut PipelineStateCacheManager {
        &mut self.pipeline_state_cache_manager
    }

    /// Pre-creates the pipeline state caches of every shader property
    /// combination, or of the mandatory ones only, under the default dynamic
    /// shader pieces. Returns the number of new caches.
    pub fn create_pipeline_state_caches(
        &mut self,
        compiler: &PipelineStateCompiler,
        mandatory_only: bool,
    ) -> usize {
        let dynamic_shader_pieces = self.material_blueprint.default_dynamic_shader_pieces();
        self.pipeline_state_cache_manager
            .create_pipeline_state_caches(compiler, &dynamic_shader_pieces, mandatory_only)
    }
}

#[derive(Default)]
pub struct MaterialBlueprintResourceManager {
    resources: FxHashMap<AssetId, MaterialBlueprintResource>,
}

impl MaterialBlueprintResourceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `material_blueprint`. A blueprint with the same asset id is
    /// replaced and its PSOs destroyed. The new caches start a generation of
    /// their own, so results still in flight for a replaced or removed
    /// blueprint never land in them.
    pub fn add(&mut self, device: &dyn RenderDevice, material_blueprint: Arc<MaterialBlueprint>) -> AssetId {
        let asset_id = material_blueprint.asset_id();
        log::info!("Material blueprint '{}' registered", material_blueprint.name());
        let resource = MaterialBlueprintResource::new(material_blueprint);
        if let Some(mut previous) = self.resources.insert(asset_id, resource) {
            previous.pipeline_state_cache_manager.clear_cache(device);
        }
        asset_id
    }

    #[must_use]
    pub fn get(&self, asset_id: AssetId) -> Option<&MaterialBlueprintResource> {
        self.resources.get(&asset_id)
    }

    pub fn get_mut(&mut self, asset_id: AssetId) -> Option<&mut MaterialBlueprintResource> {
        self.resources.get_mut(&asset_id)
    }

    /// Unregisters a blueprint and destroys its PSOs and programs.
    pub fn remove(&mut self, device: &dyn RenderDevice, asset_id: AssetId) -> bool {
        match self.resources.remove(&asset_id) {
            Some(mut resource) => {
                resource.pipeline_state_cache_manager.clear_cache(device);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialBlueprintResource> {
        self.resources.values()
    }

    /// Routes a finished PSO to its cache entry. PSOs of unknown blueprints
    /// are destroyed.
    pub fn publish(&mut self, device: &dyn RenderDevice, compiled: &CompiledPipelineState) {
        match self.resources.get_mut(&compiled.material_blueprint_id) {
            Some(resource) => resource.pipeline_state_cache_manager.publish(
                device,
                compiled.generation,
                compiled.pipeline_state_signature_id,
                compiled.pipeline_state,
            ),
            None => {
                if let Some(pipeline_state) = compiled.pipeline_state {
                    device.destroy_pipeline_state(pipeline_state);
                }
            }
        }
    }

    /// Clears the pipeline state and program caches of every blueprint.
    pub fn clear_caches(&mut self, device: &dyn RenderDevice) {
        for resource in self.resources.values_mut() {
            resource.pipeline_state_cache_manager.clear_cache(device);
        }
    }
}
