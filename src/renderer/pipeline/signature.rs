//! Pipeline State Signature
//!
//! Deterministic identity of "material blueprint + serialized fixed-function
//! state + shader properties + dynamic shader pieces". It keys the pipeline
//! state caches of a material blueprint and carries the per-stage shader
//! combination ids used by the shader and program caches.
//!
//! # Combination id
//!
//! For each stage with a shader blueprint, starting from the FNV-1a32 seed:
//!
//! 1. shader blueprint id
//! 2. stage index (a blueprint shared by two stages yields two combinations)
//! 3. `(property id, value)` for every property the shader blueprint
//!    references, in sorted property order
//! 4. `(piece id, piece bytes)` for every dynamic shader piece of the stage
//!
//! Properties the shader blueprint never reads do not change the id.
//!
//! # Signature id
//!
//! FNV-1a32 fold of the material blueprint id, the serialized pipeline state
//! hash and the combination ids of the stages that are present.

use crate::backend::{NUMBER_OF_SHADER_TYPES, ShaderType};
use crate::renderer::pipeline::pipeline_id::{PipelineStateSignatureId, ShaderCombinationId};
use crate::resources::{
    DynamicShaderPiecesPerStage, MaterialBlueprint, ShaderAssetLibrary, ShaderProperties,
};
use crate::utils::AssetId;
use crate::utils::hash::{FNV1A32_INITIAL_HASH, fnv1a32_bytes, fnv1a32_i32, fnv1a32_u32};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStateSignature {
    material_blueprint_id: AssetId,
    serialized_pipeline_state_hash: u32,
    shader_properties: ShaderProperties,
    dynamic_shader_pieces: DynamicShaderPiecesPerStage,
    shader_blueprint_ids: [Option<AssetId>; NUMBER_OF_SHADER_TYPES],
    shader_combination_ids: [Option<ShaderCombinationId>; NUMBER_OF_SHADER_TYPES],
    pipeline_state_signature_id: PipelineStateSignatureId,
}

impl PipelineStateSignature {
    /// Shader blueprints missing from `library` hash as if they referenced
    /// no properties; building them fails later with `AssetNotFound`.
    #[must_use]
    pub fn new(
        material_blueprint: &MaterialBlueprint,
        library: &ShaderAssetLibrary,
        serialized_pipeline_state_hash: u32,
        shader_properties: ShaderProperties,
        dynamic_shader_pieces: DynamicShaderPiecesPerStage,
    ) -> Self {
        let shader_blueprint_ids = *material_blueprint.shader_blueprints();
        let mut shader_combination_ids = [None; NUMBER_OF_SHADER_TYPES];

        let mut signature_hash =
            fnv1a32_u32(material_blueprint.asset_id().id(), FNV1A32_INITIAL_HASH);
        signature_hash = fnv1a32_u32(serialized_pipeline_state_hash, signature_hash);

        for shader_type in ShaderType::ALL {
            let Some(shader_blueprint_id) = shader_blueprint_ids[shader_type.index()] else {
                continue;
            };
            let shader_blueprint = library.get_shader_blueprint(shader_blueprint_id);

            let mut hash = fnv1a32_u32(shader_blueprint_id.id(), FNV1A32_INITIAL_HASH);
            hash = fnv1a32_u32(shader_type.index() as u32, hash);
            for property in shader_properties.iter() {
                if shader_blueprint
                    .as_ref()
                    .is_some_and(|b| b.references_property(property.shader_property_id))
                {
                    hash = fnv1a32_u32(property.shader_property_id.id(), hash);
                    hash = fnv1a32_i32(property.value, hash);
                }
            }
            for (piece_id, source_code) in dynamic_shader_pieces[shader_type.index()].iter() {
                hash = fnv1a32_u32(piece_id.id(), hash);
                hash = fnv1a32_bytes(source_code.as_bytes(), hash);
            }

            shader_combination_ids[shader_type.index()] = Some(ShaderCombinationId(hash));
            signature_hash = fnv1a32_u32(hash, signature_hash);
        }

        Self {
            material_blueprint_id: material_blueprint.asset_id(),
            serialized_pipeline_state_hash,
            shader_properties,
            dynamic_shader_pieces,
            shader_blueprint_ids,
            shader_combination_ids,
            pipeline_state_signature_id: PipelineStateSignatureId(signature_hash),
        }
    }

    #[inline]
    #[must_use]
    pub fn material_blueprint_id(&self) -> AssetId {
        self.material_blueprint_id
    }

    #[inline]
    #[must_use]
    pub fn serialized_pipeline_state_hash(&self) -> u32 {
        self.serialized_pipeline_state_hash
    }

    #[inline]
    #[must_use]
    pub fn shader_properties(&self) -> &ShaderProperties {
        &self.shader_properties
    }

    #[inline]
    #[must_use]
    pub fn dynamic_shader_pieces(&self) -> &DynamicShaderPiecesPerStage {
        &self.dynamic_shader_pieces
    }

    #[inline]
    #[must_use]
    pub fn shader_blueprint_id(&self, shader_type: ShaderType) -> Option<AssetId> {
        self.shader_blueprint_ids[shader_type.index()]
    }

    #[inline]
    #[must_use]
    pub fn shader_combination_id(&self, shader_type: ShaderType) -> Option<ShaderCombinationId> {
        self.shader_combination_ids[shader_type.index()]
    }

    #[inline]
    #[must_use]
    pub fn shader_combination_ids(&self) -> &[Option<ShaderCombinationId>; NUMBER_OF_SHADER_TYPES] {
        &self.shader_combination_ids
    }

    #[inline]
    #[must_use]
    pub fn pipeline_state_signature_id(&self) -> PipelineStateSignatureId {
        self.pipeline_state_signature_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{MaterialShaderProperty, VisualImportance};
    use crate::utils::StringId;

    fn setup() -> (MaterialBlueprint, ShaderAssetLibrary) {
        let library = ShaderAssetLibrary::new();
        library.add_shader_blueprint("Vs", "@property(USE_SKINNING)s@end", &[]).unwrap();
        library.add_shader_blueprint("Fs", "@foreach(NUM_LIGHTS, i)l@end", &[]).unwrap();
        let blueprint = MaterialBlueprint::builder("Mesh")
            .with_shader_blueprint(ShaderType::Vertex, "Vs")
            .with_shader_blueprint(ShaderType::Fragment, "Fs")
            .with_shader_property(MaterialShaderProperty::boolean(
                "USE_SKINNING",
                VisualImportance::Mandatory,
            ))
            .with_shader_property(MaterialShaderProperty::integer(
                "NUM_LIGHTS",
                4,
                VisualImportance::Level(1),
            ))
            .build();
        (blueprint, library)
    }

    fn signature(
        blueprint: &MaterialBlueprint,
        library: &ShaderAssetLibrary,
        properties: &[(&str, i32)],
    ) -> PipelineStateSignature {
        PipelineStateSignature::new(
            blueprint,
            library,
            7,
            ShaderProperties::from(properties),
            Default::default(),
        )
    }

    #[test]
    fn deterministic_ids() {
        let (blueprint, library) = setup();
        let a = signature(&blueprint, &library, &[("USE_SKINNING", 1), ("NUM_LIGHTS", 2)]);
        let b = signature(&blueprint, &library, &[("NUM_LIGHTS", 2), ("USE_SKINNING", 1)]);
        assert_eq!(a.pipeline_state_signature_id(), b.pipeline_state_signature_id());
        assert_eq!(a.shader_combination_ids(), b.shader_combination_ids());
        assert!(a.shader_combination_id(ShaderType::Geometry).is_none());
    }

    #[test]
    fn unreferenced_properties_do_not_change_stage_ids() {
        let (blueprint, library) = setup();
        let a = signature(&blueprint, &library, &[("USE_SKINNING", 1)]);
        let b = signature(&blueprint, &library, &[("USE_SKINNING", 1), ("NUM_LIGHTS", 3)]);

        assert_eq!(
            a.shader_combination_id(ShaderType::Vertex),
            b.shader_combination_id(ShaderType::Vertex)
        );
        assert_ne!(
            a.shader_combination_id(ShaderType::Fragment),
            b.shader_combination_id(ShaderType::Fragment)
        );
        assert_ne!(a.pipeline_state_signature_id(), b.pipeline_state_signature_id());
    }

    #[test]
    fn pipeline_state_hash_and_dynamic_pieces_change_ids() {
        let (blueprint, library) = setup();
        let base = signature(&blueprint, &library, &[]);

        let other_state = PipelineStateSignature::new(
            &blueprint,
            &library,
            8,
            ShaderProperties::new(),
            Default::default(),
        );
        assert_eq!(base.shader_combination_ids(), other_state.shader_combination_ids());
        assert_ne!(
            base.pipeline_state_signature_id(),
            other_state.pipeline_state_signature_id()
        );

        let mut pieces: DynamicShaderPiecesPerStage = Default::default();
        pieces[ShaderType::Vertex.index()].set("VertexInput", "struct VertexInput {};");
        let with_piece =
            PipelineStateSignature::new(&blueprint, &library, 7, ShaderProperties::new(), pieces);
        assert_ne!(
            base.shader_combination_id(ShaderType::Vertex),
            with_piece.shader_combination_id(ShaderType::Vertex)
        );
        assert_eq!(
            base.shader_combination_id(ShaderType::Fragment),
            with_piece.shader_combination_id(ShaderType::Fragment)
        );
        assert_eq!(
            with_piece.dynamic_shader_pieces()[ShaderType::Vertex.index()]
                .get_piece(StringId::new("VertexInput")),
            Some("struct VertexInput {};")
        );
    }

    #[test]
    fn shared_blueprint_differs_per_stage() {
        let library = ShaderAssetLibrary::new();
        library.add_shader_blueprint("Both", "x", &[]).unwrap();
        let blueprint = MaterialBlueprint::builder("M")
            .with_shader_blueprint(ShaderType::Vertex, "Both")
            .with_shader_blueprint(ShaderType::Fragment, "Both")
            .build();
        let sig = signature(&blueprint, &library, &[]);
        assert_ne!(
            sig.shader_combination_id(ShaderType::Vertex),
            sig.shader_combination_id(ShaderType::Fragment)
        );
    }
}
