//! Shader Cache
//!
//! Deduplicates compiled stage shaders on two levels:
//!
//! 1. **Combination**: the per-stage [`ShaderCombinationId`] of a pipeline
//!    state signature is the [`ShaderCacheId`].
//! 2. **Source code**: different combinations often generate byte-identical
//!    source (a property unused by the blueprint, a branch that collapses).
//!    The xxh3-128 of the generated source ([`ShaderSourceCodeId`]) maps to
//!    the first cache that produced it; later caches become aliases of that
//!    master and never hit the backend compiler.
//!
//! A [`ShaderCache`] is either a master (owns bytecode and the backend shader)
//! or an alias of a master. Aliases are only ever created from the source code
//! index, which records masters only, so alias chains never exceed length 1.
//!
//! # Completion
//!
//! A master is registered while still `Pending`, before its source has been
//! compiled, so concurrent requests for the same combination or source see it
//! immediately. Whoever needs the backend shader blocks on the master's
//! condition variable until the compiling thread publishes `Ready` or
//! `Failed`. The thread that received [`ShaderCacheResolution::Compile`] is
//! responsible for that publication.
//!
//! # Persistence
//!
//! [`ShaderCacheManager::save_cache`] writes every master that has bytecode,
//! the aliases of those masters and the source code index.
//! [`ShaderCacheManager::load_cache`] drops masters whose recorded combined
//! asset file hash no longer matches the shader asset library, together with
//! their aliases.

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{RenderDevice, ShaderBytecode, ShaderHandle, ShaderType, VertexAttributes};
use crate::errors::{PipelineError, Result};
use crate::renderer::pipeline::cache_blob::{AliasRecord, MasterRecord, ShaderCacheBlob};
use crate::renderer::pipeline::pipeline_id::{ShaderCacheId, ShaderSourceCodeId};
use crate::renderer::pipeline::shader_builder::{BuildShader, ShaderBuilder};
use crate::renderer::pipeline::signature::PipelineStateSignature;
use crate::resources::ShaderAssetLibrary;
use crate::utils::AssetId;
use crate::utils::hash::source_code_hash;

// ─── Shader Cache ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum ShaderSlot {
    /// Registered, source not compiled yet.
    Pending,
    /// Loaded from a persisted cache; the backend shader is created lazily.
    Bytecode(ShaderBytecode),
    /// `bytecode` is empty when the device cannot export bytecode.
    Ready {
        shader: ShaderHandle,
        bytecode: ShaderBytecode,
    },
    Failed,
}

#[derive(Debug)]
struct MasterShader {
    asset_ids: Vec<AssetId>,
    combined_asset_file_hashes: u64,
    slot: Mutex<ShaderSlot>,
    completed: Condvar,
}

#[derive(Debug)]
enum ShaderCacheKind {
    Master(MasterShader),
    Alias(Arc<ShaderCache>),
}

#[derive(Debug)]
pub struct ShaderCache {
    shader_cache_id: ShaderCacheId,
    shader_type: ShaderType,
    kind: ShaderCacheKind,
}

impl ShaderCache {
    fn new_master(
        shader_cache_id: ShaderCacheId,
        shader_type: ShaderType,
        asset_ids: Vec<AssetId>,
        combined_asset_file_hashes: u64,
        slot: ShaderSlot,
    ) -> Self {
        Self {
            shader_cache_id,
            shader_type,
            kind: ShaderCacheKind::Master(MasterShader {
                asset_ids,
                combined_asset_file_hashes,
                slot: Mutex::new(slot),
                completed: Condvar::new(),
            }),
        }
    }

    fn new_alias(shader_cache_id: ShaderCacheId, master: &Arc<ShaderCache>) -> Self {
        let master = match &master.kind {
            ShaderCacheKind::Master(_) => Arc::clone(master),
            ShaderCacheKind::Alias(target) => Arc::clone(target),
        };
        Self {
            shader_cache_id,
            shader_type: master.shader_type,
            kind: ShaderCacheKind::Alias(master),
        }
    }

    #[inline]
    #[must_use]
    pub fn shader_cache_id(&self) -> ShaderCacheId {
        self.shader_cache_id
    }

    #[inline]
    #[must_use]
    pub fn shader_type(&self) -> ShaderType {
        self.shader_type
    }

    #[inline]
    #[must_use]
    pub fn is_alias(&self) -> bool {
        matches!(self.kind, ShaderCacheKind::Alias(_))
    }

    /// The master this cache redirects to, `None` for masters.
    #[inline]
    #[must_use]
    pub fn master_shader_cache(&self) -> Option<&Arc<ShaderCache>> {
        match &self.kind {
            ShaderCacheKind::Master(_) => None,
            ShaderCacheKind::Alias(master) => Some(master),
        }
    }

    fn master(&self) -> &MasterShader {
        match &self.kind {
            ShaderCacheKind::Master(master) => master,
            ShaderCacheKind::Alias(target) => target.master(),
        }
    }

    /// Shader blueprint and pieces the (master's) source was generated from.
    #[must_use]
    pub fn asset_ids(&self) -> &[AssetId] {
        &self.master().asset_ids
    }

    #[must_use]
    pub fn combined_asset_file_hashes(&self) -> u64 {
        self.master().combined_asset_file_hashes
    }

    /// Backend shader, if already created.
    #[must_use]
    pub fn shader(&self) -> Option<ShaderHandle> {
        match &*self.master().slot.lock() {
            ShaderSlot::Ready { shader, .. } => Some(*shader),
            _ => None,
        }
    }

    /// Bytecode of the master, if any was captured or loaded.
    #[must_use]
    pub fn bytecode(&self) -> Option<ShaderBytecode> {
        match &*self.master().slot.lock() {
            ShaderSlot::Bytecode(bytecode) | ShaderSlot::Ready { bytecode, .. }
                if !bytecode.is_empty() =>
            {
                Some(bytecode.clone())
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.master().slot.lock(), ShaderSlot::Pending)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(*self.master().slot.lock(), ShaderSlot::Failed)
    }

    /// Returns the backend shader, waiting for a pending master and creating
    /// the shader from loaded bytecode if needed.
    pub fn realize_shader(
        &self,
        device: &dyn RenderDevice,
        vertex_attributes: &VertexAttributes,
    ) -> Result<ShaderHandle> {
        let master = self.master();
        let mut slot = master.slot.lock();
        while matches!(*slot, ShaderSlot::Pending) {
            master.completed.wait(&mut slot);
        }

        let bytecode = match &*slot {
            ShaderSlot::Ready { shader, .. } => return Ok(*shader),
            ShaderSlot::Bytecode(bytecode) => bytecode.clone(),
            ShaderSlot::Pending | ShaderSlot::Failed => {
                return Err(PipelineError::ShaderCompilation {
                    shader_type: self.shader_type,
                    log: format!("shader cache {} failed to compile", self.shader_cache_id),
                });
            }
        };

        match device.create_shader_from_bytecode(self.shader_type, vertex_attributes, &bytecode) {
            Ok(shader) => {
                *slot = ShaderSlot::Ready { shader, bytecode };
                Ok(shader)
            }
            Err(error) => {
                log::error!(
                    "Shader cache {}: bytecode rejected by {}: {error}",
                    self.shader_cache_id,
                    device.name()
                );
                *slot = ShaderSlot::Failed;
                Err(error)
            }
        }
    }

    /// Compiles `source_code` into this master and publishes the outcome.
    ///
    /// Only called by the thread that received
    /// [`ShaderCacheResolution::Compile`] for this cache.
    pub fn compile_source_code(
        &self,
        device: &dyn RenderDevice,
        vertex_attributes: &VertexAttributes,
        source_code: &str,
    ) -> Result<ShaderHandle> {
        let mut bytecode = ShaderBytecode::default();
        let capture = device.capabilities().shader_bytecode;
        let result = device.create_shader_from_source_code(
            self.shader_type,
            vertex_attributes,
            source_code,
            capture.then_some(&mut bytecode),
        );

        match &result {
            Ok(shader) => self.publish(ShaderSlot::Ready {
                shader: *shader,
                bytecode,
            }),
            Err(error) => {
                log::error!(
                    "{} shader cache {} failed to compile: {error}",
                    self.shader_type,
                    self.shader_cache_id
                );
                self.publish(ShaderSlot::Failed);
            }
        }
        result
    }

    /// Marks a pending master as failed without compiling it.
    pub(crate) fn abandon(&self) {
        let master = self.master();
        let mut slot = master.slot.lock();
        if matches!(*slot, ShaderSlot::Pending) {
            *slot = ShaderSlot::Failed;
            master.completed.notify_all();
        }
    }

    fn publish(&self, value: ShaderSlot) {
        let master = self.master();
        *master.slot.lock() = value;
        master.completed.notify_all();
    }
}

// ─── Shader Cache Manager ────────────────────────────────────────────────────

/// Outcome of [`ShaderCacheManager::resolve_shader_cache`].
#[derive(Debug)]
pub enum ShaderCacheResolution {
    /// Known cache, or a new alias of a known master.
    Cached(Arc<ShaderCache>),
    /// New pending master; the caller must compile `source_code` into it.
    Compile {
        shader_cache: Arc<ShaderCache>,
        source_code: String,
    },
}

impl ShaderCacheResolution {
    #[must_use]
    pub fn shader_cache(&self) -> &Arc<ShaderCache> {
        match self {
            Self::Cached(shader_cache) | Self::Compile { shader_cache, .. } => shader_cache,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadCacheSummary {
    pub masters: usize,
    pub aliases: usize,
    /// Masters with changed source assets plus the aliases pointing at them.
    pub dropped_stale: usize,
}

#[derive(Default)]
struct ShaderCacheMaps {
    by_shader_cache_id: FxHashMap<ShaderCacheId, Arc<ShaderCache>>,
    /// Masters only.
    by_shader_source_code_id: FxHashMap<ShaderSourceCodeId, ShaderCacheId>,
}

/// Process-wide shader cache shared by the builder thread and synchronous
/// callers. Both maps sit behind a single mutex.
#[derive(Default)]
pub struct ShaderCacheManager {
    maps: Mutex<ShaderCacheMaps>,
}

impl ShaderCacheManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds or registers the shader cache of one stage of `signature`.
    ///
    /// Returns `Ok(None)` if the material blueprint has no shader blueprint
    /// for `shader_type`. Source generation happens outside the lock; the maps
    /// are re-checked before anything is inserted.
    pub fn resolve_shader_cache(
        &self,
        library: &ShaderAssetLibrary,
        builder: &mut ShaderBuilder,
        signature: &PipelineStateSignature,
        shader_type: ShaderType,
    ) -> Result<Option<ShaderCacheResolution>> {
        let (Some(combination_id), Some(shader_blueprint_id)) = (
            signature.shader_combination_id(shader_type),
            signature.shader_blueprint_id(shader_type),
        ) else {
            return Ok(None);
        };
        let shader_cache_id = ShaderCacheId::from(combination_id);

        if let Some(shader_cache) = self.get(shader_cache_id) {
            return Ok(Some(ShaderCacheResolution::Cached(shader_cache)));
        }

        let shader_blueprint = library
            .get_shader_blueprint(shader_blueprint_id)
            .ok_or(PipelineError::AssetNotFound(shader_blueprint_id))?;
        let BuildShader {
            source_code,
            asset_ids,
            combined_asset_file_hashes,
        } = builder.create_source_code(
            library,
            &shader_blueprint,
            signature.shader_properties(),
            &signature.dynamic_shader_pieces()[shader_type.index()],
        )?;
        let source_code_id =
            ShaderSourceCodeId(source_code_hash(&source_code, shader_type.index() as u64));

        let mut maps = self.maps.lock();
        if let Some(shader_cache) = maps.by_shader_cache_id.get(&shader_cache_id) {
            return Ok(Some(ShaderCacheResolution::Cached(Arc::clone(shader_cache))));
        }

        let master = maps
            .by_shader_source_code_id
            .get(&source_code_id)
            .and_then(|id| maps.by_shader_cache_id.get(id))
            .cloned();
        if let Some(master) = master {
            log::debug!(
                "Shader cache {shader_cache_id}: identical {shader_type} source as {}, aliasing",
                master.shader_cache_id
            );
            let alias = Arc::new(ShaderCache::new_alias(shader_cache_id, &master));
            maps.by_shader_cache_id.insert(shader_cache_id, Arc::clone(&alias));
            return Ok(Some(ShaderCacheResolution::Cached(alias)));
        }

        log::debug!(
            "Shader cache {shader_cache_id}: new {shader_type} master from '{}'",
            shader_blueprint.name()
        );
        let shader_cache = Arc::new(ShaderCache::new_master(
            shader_cache_id,
            shader_type,
            asset_ids,
            combined_asset_file_hashes,
            ShaderSlot::Pending,
        ));
        maps.by_shader_cache_id.insert(shader_cache_id, Arc::clone(&shader_cache));
        maps.by_shader_source_code_id.insert(source_code_id, shader_cache_id);

        Ok(Some(ShaderCacheResolution::Compile {
            shader_cache,
            source_code,
        }))
    }

    /// Synchronous lookup: resolves, compiles if this call registered a new
    /// master and makes sure the backend shader exists.
    pub fn get_shader_cache(
        &self,
        device: &dyn RenderDevice,
        library: &ShaderAssetLibrary,
        builder: &mut ShaderBuilder,
        signature: &PipelineStateSignature,
        vertex_attributes: &VertexAttributes,
        shader_type: ShaderType,
    ) -> Result<Option<Arc<ShaderCache>>> {
        let Some(resolution) = self.resolve_shader_cache(library, builder, signature, shader_type)?
        else {
            return Ok(None);
        };

        let shader_cache = match resolution {
            ShaderCacheResolution::Cached(shader_cache) => shader_cache,
            ShaderCacheResolution::Compile {
                shader_cache,
                source_code,
            } => {
                shader_cache.compile_source_code(device, vertex_attributes, &source_code)?;
                shader_cache
            }
        };
        shader_cache.realize_shader(device, vertex_attributes)?;
        Ok(Some(shader_cache))
    }

    #[must_use]
    pub fn get(&self, shader_cache_id: ShaderCacheId) -> Option<Arc<ShaderCache>> {
        self.maps.lock().by_shader_cache_id.get(&shader_cache_id).cloned()
    }

    /// Master registered for `source_code_id`, if any.
    #[must_use]
    pub fn get_by_source_code_id(&self, source_code_id: ShaderSourceCodeId) -> Option<Arc<ShaderCache>> {
        let maps = self.maps.lock();
        maps.by_shader_source_code_id
            .get(&source_code_id)
            .and_then(|id| maps.by_shader_cache_id.get(id))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.lock().by_shader_cache_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.lock().by_shader_cache_id.is_empty()
    }

    #[must_use]
    pub fn number_of_masters(&self) -> usize {
        self.maps
            .lock()
            .by_shader_cache_id
            .values()
            .filter(|c| !c.is_alias())
            .count()
    }

    /// Destroys every backend shader and empties both maps.
    ///
    /// Callers flush the compiler first; a master still pending here is
    /// marked failed so that nobody waits on it forever.
    pub fn clear_cache(&self, device: &dyn RenderDevice) {
        let mut maps = self.maps.lock();
        for shader_cache in maps.by_shader_cache_id.values() {
            if shader_cache.is_alias() {
                continue;
            }
            shader_cache.abandon();
            if let Some(shader) = shader_cache.shader() {
                device.destroy_shader(shader);
            }
        }
        let count = maps.by_shader_cache_id.len();
        maps.by_shader_cache_id.clear();
        maps.by_shader_source_code_id.clear();
        log::debug!("Shader cache cleared ({count} entries)");
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Writes all masters with bytecode, their aliases and the source index.
    pub fn save_cache<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut blob = {
            let maps = self.maps.lock();
            let mut blob = ShaderCacheBlob::default();
            let mut saved = FxHashSet::default();

            for shader_cache in maps.by_shader_cache_id.values() {
                if shader_cache.is_alias() {
                    continue;
                }
                let Some(bytecode) = shader_cache.bytecode() else {
                    continue;
                };
                saved.insert(shader_cache.shader_cache_id);
                blob.masters.push(MasterRecord {
                    shader_cache_id: shader_cache.shader_cache_id,
                    shader_type: shader_cache.shader_type,
                    asset_ids: shader_cache.asset_ids().to_vec(),
                    combined_asset_file_hashes: shader_cache.combined_asset_file_hashes(),
                    bytecode,
                });
            }
            for shader_cache in maps.by_shader_cache_id.values() {
                if let Some(master) = shader_cache.master_shader_cache()
                    && saved.contains(&master.shader_cache_id)
                {
                    blob.aliases.push(AliasRecord {
                        shader_cache_id: shader_cache.shader_cache_id,
                        shader_type: shader_cache.shader_type,
                        master_shader_cache_id: master.shader_cache_id,
                    });
                }
            }
            for (&source_code_id, &shader_cache_id) in &maps.by_shader_source_code_id {
                if saved.contains(&shader_cache_id) {
                    blob.index.push((source_code_id, shader_cache_id));
                }
            }
            blob
        };

        // Stable output for identical caches.
        blob.masters.sort_by_key(|m| m.shader_cache_id);
        blob.aliases.sort_by_key(|a| a.shader_cache_id);
        blob.index.sort_by_key(|(source_code_id, _)| *source_code_id);

        writer.write_all(&blob.encode())?;
        log::info!(
            "Saved shader cache: {} masters, {} aliases",
            blob.masters.len(),
            blob.aliases.len()
        );
        Ok(())
    }

    /// Merges a persisted cache into this manager. Entries already present
    /// are kept; masters built from since-modified assets are dropped
    /// together with their aliases.
    pub fn load_cache<R: Read>(
        &self,
        library: &ShaderAssetLibrary,
        reader: &mut R,
    ) -> Result<LoadCacheSummary> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let blob = ShaderCacheBlob::decode(&bytes)?;

        let mut summary = LoadCacheSummary::default();
        let mut stale = FxHashSet::default();
        let mut maps = self.maps.lock();

        for master in blob.masters {
            if maps.by_shader_cache_id.contains_key(&master.shader_cache_id) {
                continue;
            }
            if library.combined_asset_file_hashes(&master.asset_ids)
                != Some(master.combined_asset_file_hashes)
            {
                log::warn!(
                    "Shader cache {}: source assets changed, dropping persisted bytecode",
                    master.shader_cache_id
                );
                stale.insert(master.shader_cache_id);
                summary.dropped_stale += 1;
                continue;
            }
            let shader_cache = ShaderCache::new_master(
                master.shader_cache_id,
                master.shader_type,
                master.asset_ids,
                master.combined_asset_file_hashes,
                ShaderSlot::Bytecode(master.bytecode),
            );
            maps.by_shader_cache_id
                .insert(master.shader_cache_id, Arc::new(shader_cache));
            summary.masters += 1;
        }

        for alias in blob.aliases {
            if maps.by_shader_cache_id.contains_key(&alias.shader_cache_id) {
                continue;
            }
            if stale.contains(&alias.master_shader_cache_id) {
                summary.dropped_stale += 1;
                continue;
            }
            let Some(master) = maps.by_shader_cache_id.get(&alias.master_shader_cache_id).cloned()
            else {
                log::warn!(
                    "Shader cache {}: alias of unknown master {}",
                    alias.shader_cache_id,
                    alias.master_shader_cache_id
                );
                continue;
            };
            let shader_cache = ShaderCache::new_alias(alias.shader_cache_id, &master);
            maps.by_shader_cache_id
                .insert(alias.shader_cache_id, Arc::new(shader_cache));
            summary.aliases += 1;
        }

        for (source_code_id, shader_cache_id) in blob.index {
            let is_master = maps
                .by_shader_cache_id
                .get(&shader_cache_id)
                .is_some_and(|c| !c.is_alias());
            if is_master {
                maps.by_shader_source_code_id
                    .entry(source_code_id)
                    .or_insert(shader_cache_id);
            }
        }

        log::info!(
            "Loaded shader cache: {} masters, {} aliases, {} stale entries dropped",
            summary.masters,
            summary.aliases,
            summary.dropped_stale
        );
        Ok(summary)
    }
}
