//! Dynamic shader pieces: source fragments generated at runtime instead of
//! loaded from a shader piece asset (vertex input structs, generated light
//! loops, ...).
//!
//! They override static pieces of the same name and take part in the shader
//! combination id exactly like shader properties do.

use std::collections::BTreeMap;

use crate::backend::{NUMBER_OF_SHADER_TYPES, VertexAttributes};
use crate::utils::{ShaderPieceId, StringId};

/// Piece id → source text, iterated in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DynamicShaderPieces {
    pieces: BTreeMap<ShaderPieceId, String>,
}

/// One set of dynamic pieces per shader stage, indexed by `ShaderType::index`.
pub type DynamicShaderPiecesPerStage = [DynamicShaderPieces; NUMBER_OF_SHADER_TYPES];

impl DynamicShaderPieces {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `VertexInput` piece generated from `vertex_attributes`.
    #[must_use]
    pub fn from_vertex_attributes(vertex_attributes: &VertexAttributes) -> Self {
        let mut pieces = Self::new();
        pieces.set("VertexInput", &vertex_attributes.vertex_input_code());
        pieces
    }

    pub fn set(&mut self, name: &str, source_code: &str) {
        self.set_piece(StringId::new(name), source_code.to_string());
    }

    pub fn set_piece(&mut self, shader_piece_id: ShaderPieceId, source_code: String) {
        self.pieces.insert(shader_piece_id, source_code);
    }

    #[must_use]
    pub fn get_piece(&self, shader_piece_id: ShaderPieceId) -> Option<&str> {
        self.pieces.get(&shader_piece_id).map(String::as_str)
    }

    pub fn remove_piece(&mut self, shader_piece_id: ShaderPieceId) -> bool {
        self.pieces.remove(&shader_piece_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShaderPieceId, &str)> {
        self.pieces.iter().map(|(id, source)| (*id, source.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn clear(&mut self) {
        self.pieces.clear();
    }
}
