//! Program Cache
//!
//! Links the realized stage shaders of a pipeline state signature into a
//! backend program, deduplicated by the fold of all per-stage shader
//! combination ids. One [`ProgramCacheManager`] exists per material blueprint.
//!
//! The manager is stamped with the generation of its pipeline state cache
//! manager. Requests queued under an older generation link nothing: the
//! check happens under the same lock a clear takes, so a program can never
//! be inserted into a cache that was cleared after the request was queued.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::backend::{ProgramHandle, RenderDevice, ShaderType, StageShaders};
use crate::errors::{PipelineError, Result};
use crate::renderer::pipeline::pipeline_id::ProgramCacheId;
use crate::renderer::pipeline::signature::PipelineStateSignature;
use crate::resources::MaterialBlueprint;
use crate::utils::hash::{FNV1A32_INITIAL_HASH, fnv1a32_u32};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramCache {
    pub program_cache_id: ProgramCacheId,
    pub program: ProgramHandle,
}

/// Stages without a combination id contribute nothing.
#[must_use]
pub fn generate_program_cache_id(signature: &PipelineStateSignature) -> ProgramCacheId {
    let hash = signature
        .shader_combination_ids()
        .iter()
        .flatten()
        .fold(FNV1A32_INITIAL_HASH, |hash, id| fnv1a32_u32(id.id(), hash));
    ProgramCacheId(hash)
}

struct ProgramCaches {
    generation: u64,
    by_id: FxHashMap<ProgramCacheId, ProgramCache>,
}

pub struct ProgramCacheManager {
    program_caches: Mutex<ProgramCaches>,
}

impl ProgramCacheManager {
    #[must_use]
    pub fn new(generation: u64) -> Self {
        Self {
            program_caches: Mutex::new(ProgramCaches {
                generation,
                by_id: FxHashMap::default(),
            }),
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.program_caches.lock().generation
    }

    #[must_use]
    pub fn get_program_cache_by_pipeline_state_signature(
        &self,
        signature: &PipelineStateSignature,
    ) -> Option<ProgramCache> {
        self.get(generate_program_cache_id(signature))
    }

    /// Returns the cached program for `signature` or links `shaders` into a
    /// new one. The lock is held while linking so concurrent workers never
    /// create the same program twice.
    ///
    /// Returns `Ok(None)` without linking if `generation` is not the current
    /// one.
    pub fn get_or_create_program_cache(
        &self,
        device: &dyn RenderDevice,
        material_blueprint: &MaterialBlueprint,
        signature: &PipelineStateSignature,
        shaders: &StageShaders,
        generation: u64,
    ) -> Result<Option<ProgramCache>> {
        let program_cache_id = generate_program_cache_id(signature);
        let mut program_caches = self.program_caches.lock();
        if program_caches.generation != generation {
            return Ok(None);
        }
        if let Some(program_cache) = program_caches.by_id.get(&program_cache_id) {
            return Ok(Some(*program_cache));
        }

        validate_stage_shaders(device, shaders)?;
        let program = device.create_program(
            material_blueprint.root_signature(),
            material_blueprint.vertex_attributes(),
            shaders,
        )?;
        let program_cache = ProgramCache {
            program_cache_id,
            program,
        };
        program_caches.by_id.insert(program_cache_id, program_cache);
        log::debug!(
            "Program cache {program_cache_id} created for material blueprint '{}'",
            material_blueprint.name()
        );
        Ok(Some(program_cache))
    }

    #[must_use]
    pub fn get(&self, program_cache_id: ProgramCacheId) -> Option<ProgramCache> {
        self.program_caches.lock().by_id.get(&program_cache_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.program_caches.lock().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.program_caches.lock().by_id.is_empty()
    }

    /// Destroys every program and moves to `generation`.
    pub fn clear_cache(&self, device: &dyn RenderDevice, generation: u64) {
        let mut program_caches = self.program_caches.lock();
        program_caches.generation = generation;
        for (_, program_cache) in program_caches.by_id.drain() {
            device.destroy_program(program_cache.program);
        }
    }
}

/// Every shader must exist, be written in the device's shader language and
/// sit in the slot of its own stage.
fn validate_stage_shaders(device: &dyn RenderDevice, shaders: &StageShaders) -> Result<()> {
    let expected = device.shader_language();
    for (slot, shader) in ShaderType::ALL.into_iter().zip(shaders) {
        let Some(shader) = shader else {
            continue;
        };
        let info = device.shader_info(*shader).ok_or_else(|| {
            PipelineError::ProgramCreation(format!("{slot} shader handle is not alive"))
        })?;
        if info.language != expected {
            return Err(PipelineError::ShaderLanguageMismatch {
                expected,
                found: info.language,
            });
        }
        if info.shader_type != slot {
            return Err(PipelineError::ShaderTypeMismatch {
                slot,
                found: info.shader_type,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NullRenderDevice, ShaderLanguage};
    use crate::resources::{ShaderAssetLibrary, ShaderProperties};

    fn setup() -> (NullRenderDevice, MaterialBlueprint, PipelineStateSignature) {
        let library = ShaderAssetLibrary::new();
        library.add_shader_blueprint("Vs", "vs", &[]).unwrap();
        library.add_shader_blueprint("Fs", "fs", &[]).unwrap();
        let blueprint = MaterialBlueprint::builder("Mesh")
            .with_shader_blueprint(ShaderType::Vertex, "Vs")
            .with_shader_blueprint(ShaderType::Fragment, "Fs")
            .build();
        let signature = PipelineStateSignature::new(
            &blueprint,
            &library,
            0,
            ShaderProperties::new(),
            Default::default(),
        );
        (NullRenderDevice::new(), blueprint, signature)
    }

    #[test]
    fn programs_are_deduplicated() {
        let (device, blueprint, signature) = setup();
        let manager = ProgramCacheManager::new(1);
        let mut shaders: StageShaders = Default::default();
        shaders[ShaderType::Vertex.index()] =
            Some(device.create_shader_with_language(ShaderType::Vertex, ShaderLanguage::NULL, "vs"));
        shaders[ShaderType::Fragment.index()] = Some(device.create_shader_with_language(
            ShaderType::Fragment,
            ShaderLanguage::NULL,
            "fs",
        ));

        let first = manager
            .get_or_create_program_cache(&device, &blueprint, &signature, &shaders, 1)
            .unwrap()
            .unwrap();
        let second = manager
            .get_or_create_program_cache(&device, &blueprint, &signature, &shaders, 1)
            .unwrap();
        assert_eq!(Some(first), second);
        assert_eq!(device.number_of_programs_created(), 1);
        assert_eq!(
            manager.get_program_cache_by_pipeline_state_signature(&signature),
            Some(first)
        );

        manager.clear_cache(&device, 2);
        assert!(manager.is_empty());
        assert_eq!(device.number_of_live_programs(), 0);
    }

    #[test]
    fn links_of_a_previous_generation_are_rejected() {
        let (device, blueprint, signature) = setup();
        let manager = ProgramCacheManager::new(1);
        manager.clear_cache(&device, 2);
        assert_eq!(manager.generation(), 2);

        let mut shaders: StageShaders = Default::default();
        shaders[ShaderType::Vertex.index()] =
            Some(device.create_shader_with_language(ShaderType::Vertex, ShaderLanguage::NULL, "vs"));
        let stale = manager
            .get_or_create_program_cache(&device, &blueprint, &signature, &shaders, 1)
            .unwrap();
        assert_eq!(stale, None);
        assert!(manager.is_empty());
        assert_eq!(device.number_of_programs_created(), 0);

        let current = manager
            .get_or_create_program_cache(&device, &blueprint, &signature, &shaders, 2)
            .unwrap();
        assert!(current.is_some());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn foreign_language_is_rejected() {
        let (device, blueprint, signature) = setup();
        let mut shaders: StageShaders = Default::default();
        shaders[ShaderType::Vertex.index()] =
            Some(device.create_shader_with_language(ShaderType::Vertex, ShaderLanguage::WGSL, "vs"));

        let result = ProgramCacheManager::new(1)
            .get_or_create_program_cache(&device, &blueprint, &signature, &shaders, 1);
        assert!(matches!(
            result,
            Err(PipelineError::ShaderLanguageMismatch {
                expected: ShaderLanguage::NULL,
                found: ShaderLanguage::WGSL
            })
        ));
        assert_eq!(device.number_of_programs_created(), 0);
    }

    #[test]
    fn wrong_stage_slot_is_rejected() {
        let (device, blueprint, signature) = setup();
        let mut shaders: StageShaders = Default::default();
        shaders[ShaderType::Vertex.index()] = Some(device.create_shader_with_language(
            ShaderType::Fragment,
            ShaderLanguage::NULL,
            "fs",
        ));

        let result = ProgramCacheManager::new(1)
            .get_or_create_program_cache(&device, &blueprint, &signature, &shaders, 1);
        assert!(matches!(
            result,
            Err(PipelineError::ShaderTypeMismatch {
                slot: ShaderType::Vertex,
                found: ShaderType::Fragment
            })
        ));
    }
}
