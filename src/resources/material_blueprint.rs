//! Material Blueprint
//!
//! Immutable description of a material family: which shader blueprint feeds
//! each stage, the fixed-function pipeline state, the vertex input, the root
//! signature, and the shader properties the material exposes together with
//! their visual importance.
//!
//! # Usage
//!
//! ```rust,ignore
//! let blueprint = MaterialBlueprint::builder("Mesh")
//!     .with_shader_blueprint(ShaderType::Vertex, "MeshVs")
//!     .with_shader_blueprint(ShaderType::Fragment, "MeshFs")
//!     .with_shader_property(MaterialShaderProperty::boolean("USE_SKINNING", VisualImportance::Mandatory))
//!     .with_shader_property(MaterialShaderProperty::integer("NUM_LIGHTS", 4, VisualImportance::Level(1)))
//!     .build();
//! ```

use serde::{Deserialize, Serialize};

use crate::backend::{NUMBER_OF_SHADER_TYPES, RootSignature, ShaderType, VertexAttributes};
use crate::renderer::pipeline::pipeline_key::PipelineState;
use crate::resources::{DynamicShaderPieces, DynamicShaderPiecesPerStage, ShaderProperties};
use crate::utils::{AssetId, ShaderPropertyId, StringId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderPropertyValueType {
    /// Values `0` and `1`.
    Boolean,
    /// Values `0..number_of_values`.
    Integer { number_of_values: u32 },
}

/// How noticeable a property is when a fallback PSO compiled without it is
/// shown instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VisualImportance {
    /// Higher levels are stripped later during the fallback search.
    Level(u32),
    /// Never stripped; combinations are precompiled at load time.
    Mandatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialShaderProperty {
    pub shader_property_id: ShaderPropertyId,
    pub value_type: ShaderPropertyValueType,
    pub visual_importance: VisualImportance,
}

impl MaterialShaderProperty {
    #[must_use]
    pub fn boolean(name: &str, visual_importance: VisualImportance) -> Self {
        Self {
            shader_property_id: StringId::new(name),
            value_type: ShaderPropertyValueType::Boolean,
            visual_importance,
        }
    }

    #[must_use]
    pub fn integer(name: &str, number_of_values: u32, visual_importance: VisualImportance) -> Self {
        Self {
            shader_property_id: StringId::new(name),
            value_type: ShaderPropertyValueType::Integer { number_of_values },
            visual_importance,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.visual_importance == VisualImportance::Mandatory
    }

    /// Number of distinct values, at least 1.
    #[must_use]
    pub fn number_of_values(&self) -> u32 {
        match self.value_type {
            ShaderPropertyValueType::Boolean => 2,
            ShaderPropertyValueType::Integer { number_of_values } => number_of_values.max(1),
        }
    }
}

#[derive(Debug)]
pub struct MaterialBlueprint {
    asset_id: AssetId,
    name: String,
    shader_blueprints: [Option<AssetId>; NUMBER_OF_SHADER_TYPES],
    pipeline_state: PipelineState,
    vertex_attributes: VertexAttributes,
    root_signature: RootSignature,
    /// Sorted by id.
    shader_properties: Vec<MaterialShaderProperty>,
}

impl MaterialBlueprint {
    #[must_use]
    pub fn builder(name: &str) -> MaterialBlueprintBuilder {
        MaterialBlueprintBuilder::new(name)
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
    pub fn shader_blueprint(&self, shader_type: ShaderType) -> Option<AssetId> {
        self.shader_blueprints[shader_type.index()]
    }

    #[inline]
    #[must_use]
    pub fn shader_blueprints(&self) -> &[Option<AssetId>; NUMBER_OF_SHADER_TYPES] {
        &self.shader_blueprints
    }

    #[inline]
    #[must_use]
    pub fn pipeline_state(&self) -> &PipelineState {
        &self.pipeline_state
    }

    #[inline]
    #[must_use]
    pub fn vertex_attributes(&self) -> &VertexAttributes {
        &self.vertex_attributes
    }

    #[inline]
    #[must_use]
    pub fn root_signature(&self) -> &RootSignature {
        &self.root_signature
    }

    #[inline]
    #[must_use]
    pub fn shader_properties(&self) -> &[MaterialShaderProperty] {
        &self.shader_properties
    }

    #[must_use]
    pub fn shader_property(&self, shader_property_id: ShaderPropertyId) -> Option<&MaterialShaderProperty> {
        self.shader_properties
            .binary_search_by_key(&shader_property_id, |p| p.shader_property_id)
            .ok()
            .map(|idx| &self.shader_properties[idx])
    }

    /// Drops zero values and properties this material does not expose.
    #[must_use]
    pub fn optimize_shader_properties(&self, shader_properties: &ShaderProperties) -> ShaderProperties {
        let mut optimized = ShaderProperties::with_capacity(shader_properties.len());
        for property in shader_properties.iter() {
            if property.value != 0 && self.shader_property(property.shader_property_id).is_some() {
                optimized.set_property_value(property.shader_property_id, property.value);
            }
        }
        optimized
    }

    /// Dynamic pieces every lookup of this material starts from: the
    /// vertex stage receives a `VertexInput` piece generated from the vertex
    /// attributes.
    #[must_use]
    pub fn default_dynamic_shader_pieces(&self) -> DynamicShaderPiecesPerStage {
        let mut pieces = DynamicShaderPiecesPerStage::default();
        if self.vertex_attributes.number_of_attributes() > 0 {
            pieces[ShaderType::Vertex.index()] =
                DynamicShaderPieces::from_vertex_attributes(&self.vertex_attributes);
        }
        pieces
    }
}

pub struct MaterialBlueprintBuilder {
    name: String,
    shader_blueprints: [Option<AssetId>; NUMBER_OF_SHADER_TYPES],
    pipeline_state: PipelineState,
    vertex_attributes: VertexAttributes,
    root_signature: RootSignature,
    shader_properties: Vec<MaterialShaderProperty>,
}

impl MaterialBlueprintBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shader_blueprints: [None; NUMBER_OF_SHADER_TYPES],
            pipeline_state: PipelineState::default(),
            vertex_attributes: VertexAttributes::default(),
            root_signature: RootSignature::default(),
            shader_properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_shader_blueprint(mut self, shader_type: ShaderType, shader_blueprint: &str) -> Self {
        self.shader_blueprints[shader_type.index()] = Some(StringId::new(shader_blueprint));
        self
    }

    #[must_use]
    pub fn with_pipeline_state(mut self, pipeline_state: PipelineState) -> Self {
        self.pipeline_state = pipeline_state;
        self
    }

    #[must_use]
    pub fn with_vertex_attributes(mut self, vertex_attributes: VertexAttributes) -> Self {
        self.vertex_attributes = vertex_attributes;
        self
    }

    #[must_use]
    pub fn with_root_signature(mut self, root_signature: RootSignature) -> Self {
        self.root_signature = root_signature;
        self
    }

    /// Adds or replaces a shader property.
    #[must_use]
    pub fn with_shader_property(mut self, property: MaterialShaderProperty) -> Self {
        match self
            .shader_properties
            .binary_search_by_key(&property.shader_property_id, |p| p.shader_property_id)
        {
            Ok(idx) => self.shader_properties[idx] = property,
            Err(idx) => self.shader_properties.insert(idx, property),
        }
        self
    }

    #[must_use]
    pub fn build(self) -> MaterialBlueprint {
        MaterialBlueprint {
            asset_id: StringId::new(&self.name),
            name: self.name,
            shader_blueprints: self.shader_blueprints,
            pipeline_state: self.pipeline_state,
            vertex_attributes: self.vertex_attributes,
            root_signature: self.root_signature,
            shader_properties: self.shader_properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint() -> MaterialBlueprint {
        MaterialBlueprint::builder("Mesh")
            .with_shader_blueprint(ShaderType::Vertex, "MeshVs")
            .with_shader_property(MaterialShaderProperty::boolean(
                "USE_SKINNING",
                VisualImportance::Mandatory,
            ))
            .with_shader_property(MaterialShaderProperty::integer(
                "NUM_LIGHTS",
                4,
                VisualImportance::Level(1),
            ))
            .build()
    }

    #[test]
    fn optimize_drops_zero_and_unknown_properties() {
        let blueprint = blueprint();
        let properties =
            ShaderProperties::from(&[("USE_SKINNING", 0), ("NUM_LIGHTS", 2), ("USE_FOG", 1)][..]);

        let optimized = blueprint.optimize_shader_properties(&properties);
        assert_eq!(optimized.len(), 1);
        assert_eq!(optimized.get_property_value(StringId::new("NUM_LIGHTS")), Some(2));
    }

    #[test]
    fn shader_property_lookup() {
        let blueprint = blueprint();
        assert!(blueprint
            .shader_property(StringId::new("USE_SKINNING"))
            .is_some_and(MaterialShaderProperty::is_mandatory));
        assert_eq!(
            blueprint
                .shader_property(StringId::new("NUM_LIGHTS"))
                .map(MaterialShaderProperty::number_of_values),
            Some(4)
        );
        assert_eq!(blueprint.shader_blueprint(ShaderType::Fragment), None);
    }
}
