//! Resource Definitions
//!
//! Data the pipeline runtime consumes, independent of any GPU backend:
//! - ShaderProperties: sorted property id → value sets
//! - DynamicShaderPieces: runtime-generated shader pieces
//! - ShaderAssetLibrary: shader blueprints and shader pieces with content hashes
//! - MaterialBlueprint: stage blueprints, pipeline state, shader properties
//! - MaterialBlueprintResource: a registered blueprint and its PSO caches

pub mod dynamic_shader_pieces;
pub mod material_blueprint;
pub mod material_blueprint_resource;
pub mod shader_blueprint;
pub mod shader_properties;

pub use dynamic_shader_pieces::{DynamicShaderPieces, DynamicShaderPiecesPerStage};
pub use material_blueprint::{
    MaterialBlueprint, MaterialBlueprintBuilder, MaterialShaderProperty, ShaderPropertyValueType,
    VisualImportance,
};
pub use material_blueprint_resource::{MaterialBlueprintResource, MaterialBlueprintResourceManager};
pub use shader_blueprint::{ShaderAssetLibrary, ShaderBlueprintResource, ShaderPieceResource};
pub use shader_properties::{ShaderProperties, ShaderProperty};
