//! Shader blueprint and shader piece assets.
//!
//! A shader blueprint is a template shader source with embedded directives; a
//! shader piece is a reusable fragment included by blueprints. Both carry a
//! content hash of their file so persisted shader caches built from an older
//! version can be detected as stale.
//!
//! The [`ShaderAssetLibrary`] is shared between the render thread and the
//! compiler threads, hence the `RwLock`s and `Arc`'d resources: a reader keeps
//! the version it looked up even if the asset is hot-reloaded meanwhile.
//!
//! Blueprints and pieces share one id space: registering a piece under a
//! blueprint's name, or the other way round, is rejected.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::{PipelineError, Result};
use crate::renderer::pipeline::shader_builder::collect_referenced_properties;
use crate::utils::hash::{FNV1A64_INITIAL_HASH, file_content_hash, fnv1a64_u64};
use crate::utils::{AssetId, ShaderPropertyId, StringId};

#[derive(Debug)]
pub struct ShaderPieceResource {
    asset_id: AssetId,
    name: String,
    source_code: String,
    file_hash: u64,
}

impl ShaderPieceResource {
    #[must_use]
    pub fn new(name: &str, source_code: &str) -> Self {
        Self {
            asset_id: StringId::new(name),
            name: name.to_string(),
            source_code: source_code.to_string(),
            file_hash: file_content_hash(source_code.as_bytes()),
        }
    }

    #[inline]
    #[must_use]
    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    #[inline]
    #[must_use]
    pub fn file_hash(&self) -> u64 {
        self.file_hash
    }
}

#[derive(Debug)]
pub struct ShaderBlueprintResource {
    asset_id: AssetId,
    name: String,
    source_code: String,
    included_shader_pieces: Vec<AssetId>,
    /// Properties the blueprint (or its pieces) actually reads. Only these
    /// take part in the shader combination id.
    referenced_shader_properties: FxHashSet<ShaderPropertyId>,
    explicit_references: bool,
    file_hash: u64,
}

impl ShaderBlueprintResource {
    #[inline]
    #[must_use]
    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    #[inline]
    #[must_use]
    pub fn included_shader_pieces(&self) -> &[AssetId] {
        &self.included_shader_pieces
    }

    #[inline]
    #[must_use]
    pub fn referenced_shader_properties(&self) -> &FxHashSet<ShaderPropertyId> {
        &self.referenced_shader_properties
    }

    #[inline]
    #[must_use]
    pub fn references_property(&self, shader_property_id: ShaderPropertyId) -> bool {
        self.referenced_shader_properties.contains(&shader_property_id)
    }

    #[inline]
    #[must_use]
    pub fn file_hash(&self) -> u64 {
        self.file_hash
    }

    fn with_source_code(&self, source_code: &str) -> Self {
        Self {
            asset_id: self.asset_id,
            name: self.name.clone(),
            source_code: source_code.to_string(),
            included_shader_pieces: self.included_shader_pieces.clone(),
            referenced_shader_properties: self.referenced_shader_properties.clone(),
            explicit_references: self.explicit_references,
            file_hash: file_content_hash(source_code.as_bytes()),
        }
    }

    fn with_referenced_properties(&self, referenced: FxHashSet<ShaderPropertyId>) -> Self {
        Self {
            asset_id: self.asset_id,
            name: self.name.clone(),
            source_code: self.source_code.clone(),
            included_shader_pieces: self.included_shader_pieces.clone(),
            referenced_shader_properties: referenced,
            explicit_references: self.explicit_references,
            file_hash: self.file_hash,
        }
    }
}

/// Registry of shader blueprints and shader pieces.
#[derive(Default)]
pub struct ShaderAssetLibrary {
    // Lock order: `pieces` before `blueprints`.
    pieces: RwLock<FxHashMap<AssetId, Arc<ShaderPieceResource>>>,
    blueprints: RwLock<FxHashMap<AssetId, Arc<ShaderBlueprintResource>>>,
}

impl ShaderAssetLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a shader piece. Blueprints including it get
    /// their referenced shader properties re-derived.
    pub fn add_shader_piece(&self, name: &str, source_code: &str) -> Result<AssetId> {
        let piece = ShaderPieceResource::new(name, source_code);
        let asset_id = piece.asset_id;
        {
            let mut pieces = self.pieces.write();
            if self.blueprints.read().contains_key(&asset_id) {
                return Err(PipelineError::AssetNameConflict {
                    name: name.to_string(),
                    existing: "shader blueprint",
                });
            }
            pieces.insert(asset_id, Arc::new(piece));
        }
        self.rederive_including(asset_id);
        Ok(asset_id)
    }

    /// Registers (or replaces) a shader blueprint. Referenced shader
    /// properties are derived from its directives and those of its pieces.
    pub fn add_shader_blueprint(
        &self,
        name: &str,
        source_code: &str,
        included_shader_pieces: &[&str],
    ) -> Result<AssetId> {
        let included: Vec<AssetId> = included_shader_pieces
            .iter()
            .map(|n| StringId::new(n))
            .collect();
        let pieces = self.pieces.read();
        let referenced = derive_referenced_properties(source_code, &included, &pieces);
        self.insert_blueprint(&pieces, name, source_code, included, referenced, false)
    }

    /// Registers a shader blueprint with an explicit referenced property list.
    pub fn add_shader_blueprint_with_references(
        &self,
        name: &str,
        source_code: &str,
        included_shader_pieces: &[&str],
        referenced_shader_properties: &[&str],
    ) -> Result<AssetId> {
        let included = included_shader_pieces
            .iter()
            .map(|n| StringId::new(n))
            .collect();
        let referenced = referenced_shader_properties
            .iter()
            .map(|n| StringId::new(n))
            .collect();
        self.insert_blueprint(&self.pieces.read(), name, source_code, included, referenced, true)
    }

    pub fn update_shader_blueprint_source(&self, asset_id: AssetId, source_code: &str) -> Result<()> {
        let pieces = self.pieces.read();
        let mut blueprints = self.blueprints.write();
        let current = blueprints
            .get(&asset_id)
            .ok_or(PipelineError::AssetNotFound(asset_id))?;

        let mut updated = current.with_source_code(source_code);
        if !updated.explicit_references {
            updated.referenced_shader_properties = derive_referenced_properties(
                source_code,
                &updated.included_shader_pieces,
                &pieces,
            );
        }
        blueprints.insert(asset_id, Arc::new(updated));
        Ok(())
    }

    pub fn update_shader_piece_source(&self, asset_id: AssetId, source_code: &str) -> Result<()> {
        {
            let mut pieces = self.pieces.write();
            let current = pieces
                .get(&asset_id)
                .ok_or(PipelineError::AssetNotFound(asset_id))?;
            let updated = ShaderPieceResource::new(&current.name, source_code);
            pieces.insert(asset_id, Arc::new(updated));
        }
        self.rederive_including(asset_id);
        Ok(())
    }

    #[must_use]
    pub fn get_shader_blueprint(&self, asset_id: AssetId) -> Option<Arc<ShaderBlueprintResource>> {
        self.blueprints.read().get(&asset_id).cloned()
    }

    #[must_use]
    pub fn get_shader_piece(&self, asset_id: AssetId) -> Option<Arc<ShaderPieceResource>> {
        self.pieces.read().get(&asset_id).cloned()
    }

    /// Current content hash of a blueprint or piece. Ids are unique across
    /// both kinds.
    #[must_use]
    pub fn file_hash(&self, asset_id: AssetId) -> Option<u64> {
        if let Some(piece) = self.pieces.read().get(&asset_id) {
            return Some(piece.file_hash);
        }
        self.blueprints.read().get(&asset_id).map(|b| b.file_hash)
    }

    /// FNV-1a64 fold of the current file hashes of `asset_ids`, in order.
    /// `None` if any asset is no longer registered.
    #[must_use]
    pub fn combined_asset_file_hashes(&self, asset_ids: &[AssetId]) -> Option<u64> {
        asset_ids.iter().try_fold(FNV1A64_INITIAL_HASH, |hash, &asset_id| {
            self.file_hash(asset_id).map(|h| fnv1a64_u64(h, hash))
        })
    }

    #[must_use]
    pub fn number_of_shader_blueprints(&self) -> usize {
        self.blueprints.read().len()
    }

    #[must_use]
    pub fn number_of_shader_pieces(&self) -> usize {
        self.pieces.read().len()
    }

    /// `pieces` is the held read guard of the piece table, which keeps a
    /// piece of the same name from being registered meanwhile.
    fn insert_blueprint(
        &self,
        pieces: &FxHashMap<AssetId, Arc<ShaderPieceResource>>,
        name: &str,
        source_code: &str,
        included_shader_pieces: Vec<AssetId>,
        referenced_shader_properties: FxHashSet<ShaderPropertyId>,
        explicit_references: bool,
    ) -> Result<AssetId> {
        let asset_id = StringId::new(name);
        if pieces.contains_key(&asset_id) {
            return Err(PipelineError::AssetNameConflict {
                name: name.to_string(),
                existing: "shader piece",
            });
        }
        let blueprint = ShaderBlueprintResource {
            asset_id,
            name: name.to_string(),
            source_code: source_code.to_string(),
            included_shader_pieces,
            referenced_shader_properties,
            explicit_references,
            file_hash: file_content_hash(source_code.as_bytes()),
        };
        self.blueprints.write().insert(asset_id, Arc::new(blueprint));
        Ok(asset_id)
    }

    fn rederive_including(&self, piece_id: AssetId) {
        let pieces = self.pieces.read();
        let mut blueprints = self.blueprints.write();
        for blueprint in blueprints.values_mut() {
            if blueprint.explicit_references || !blueprint.included_shader_pieces.contains(&piece_id) {
                continue;
            }
            let referenced = derive_referenced_properties(
                &blueprint.source_code,
                &blueprint.included_shader_pieces,
                &pieces,
            );
            *blueprint = Arc::new(blueprint.with_referenced_properties(referenced));
        }
    }
}

fn derive_referenced_properties(
    source_code: &str,
    included_shader_pieces: &[AssetId],
    pieces: &FxHashMap<AssetId, Arc<ShaderPieceResource>>,
) -> FxHashSet<ShaderPropertyId> {
    let mut referenced: FxHashSet<ShaderPropertyId> =
        collect_referenced_properties(source_code).into_iter().collect();
    for piece_id in included_shader_pieces {
        if let Some(piece) = pieces.get(piece_id) {
            referenced.extend(collect_referenced_properties(&piece.source_code));
        }
    }
    referenced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_properties_include_pieces() {
        let library = ShaderAssetLibrary::new();
        library.add_shader_piece("Lighting", "@piece(Light)@property(NUM_LIGHTS)x@end@end").unwrap();
        let id = library.add_shader_blueprint(
            "Mesh",
            "@property(USE_SKINNING)s@end @insertpiece(Light)",
            &["Lighting"],
        ).unwrap();

        let blueprint = library.get_shader_blueprint(id).unwrap();
        assert!(blueprint.references_property(StringId::new("USE_SKINNING")));
        assert!(blueprint.references_property(StringId::new("NUM_LIGHTS")));
        assert!(!blueprint.references_property(StringId::new("USE_FOG")));
    }

    #[test]
    fn late_piece_registration_rederives_references() {
        let library = ShaderAssetLibrary::new();
        let id = library.add_shader_blueprint("Mesh", "@insertpiece(Fog)", &["FogPiece"]).unwrap();
        assert!(!library
            .get_shader_blueprint(id)
            .unwrap()
            .references_property(StringId::new("USE_FOG")));

        library.add_shader_piece("FogPiece", "@piece(Fog)@property(USE_FOG)f@end@end").unwrap();
        assert!(library
            .get_shader_blueprint(id)
            .unwrap()
            .references_property(StringId::new("USE_FOG")));
    }

    #[test]
    fn explicit_references_are_kept() {
        let library = ShaderAssetLibrary::new();
        let id = library.add_shader_blueprint_with_references(
            "Mesh",
            "@property(A)a@end",
            &[],
            &["B"],
        ).unwrap();
        let blueprint = library.get_shader_blueprint(id).unwrap();
        assert!(blueprint.references_property(StringId::new("B")));
        assert!(!blueprint.references_property(StringId::new("A")));
    }

    #[test]
    fn updating_source_changes_file_hash() {
        let library = ShaderAssetLibrary::new();
        let id = library.add_shader_blueprint("Mesh", "v1", &[]).unwrap();
        let before = library.combined_asset_file_hashes(&[id]).unwrap();

        library.update_shader_blueprint_source(id, "v2").unwrap();
        assert_ne!(library.combined_asset_file_hashes(&[id]).unwrap(), before);

        let missing = StringId::new("Missing");
        assert!(library.combined_asset_file_hashes(&[id, missing]).is_none());
        assert!(matches!(
            library.update_shader_piece_source(missing, ""),
            Err(PipelineError::AssetNotFound(_))
        ));
    }

    #[test]
    fn blueprint_and_piece_names_cannot_collide() {
        let library = ShaderAssetLibrary::new();
        let piece = library.add_shader_piece("Common", "@piece(Header)h@end").unwrap();
        assert!(matches!(
            library.add_shader_blueprint("Common", "b", &[]),
            Err(PipelineError::AssetNameConflict { existing: "shader piece", .. })
        ));
        let blueprint = library.add_shader_blueprint("Mesh", "m", &[]).unwrap();
        assert!(matches!(
            library.add_shader_piece("Mesh", "p"),
            Err(PipelineError::AssetNameConflict { existing: "shader blueprint", .. })
        ));

        // Each id resolves to the hash of its own asset.
        assert_eq!(
            library.file_hash(piece),
            Some(file_content_hash(b"@piece(Header)h@end"))
        );
        assert_eq!(library.file_hash(blueprint), Some(file_content_hash(b"m")));
        assert!(library.get_shader_blueprint(piece).is_none());

        // Re-registering under the same kind still replaces.
        library.add_shader_piece("Common", "@piece(Header)h2@end").unwrap();
        assert_eq!(
            library.file_hash(piece),
            Some(file_content_hash(b"@piece(Header)h2@end"))
        );
    }
}
