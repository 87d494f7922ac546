//! Shader Property System
//!
//! A shader property is a named integer that drives conditional compilation of
//! a shader blueprint (`USE_NORMAL_MAP = 1`, `NUM_LIGHTS = 3`).
//!
//! # Architecture
//!
//! [`ShaderProperties`] stores `(ShaderPropertyId, i32)` pairs in a `Vec`
//! sorted by id:
//!
//! - **Deterministic hashing**: identical sets always fold into identical
//!   cache keys, regardless of insertion order
//! - **Fast lookup**: O(log n) binary search
//! - **Cheap copies**: a flat vector, cloned freely as a value type
//!
//! # Usage
//!
//! ```rust,ignore
//! use myth_pipeline::resources::ShaderProperties;
//!
//! let mut properties = ShaderProperties::new();
//! properties.set("USE_SKINNING", 1);
//! properties.set("NUM_LIGHTS", 2);
//! ```

use serde::{Deserialize, Serialize};

use crate::utils::{ShaderPropertyId, StringId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderProperty {
    pub shader_property_id: ShaderPropertyId,
    pub value: i32,
}

/// Sorted shader property id → value map.
///
/// # Performance
///
/// - Insertion/lookup: O(log n) search, O(n) worst-case insertion shift
/// - Hash / equality: O(n) over the sorted vector
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderProperties {
    properties: Vec<ShaderProperty>,
}

impl ShaderProperties {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            properties: Vec::with_capacity(capacity),
        }
    }

    /// Set a property by name (maintains sorted order).
    #[inline]
    pub fn set(&mut self, name: &str, value: i32) {
        self.set_property_value(StringId::new(name), value);
    }

    /// Inserts or overwrites.
    pub fn set_property_value(&mut self, shader_property_id: ShaderPropertyId, value: i32) {
        match self.position(shader_property_id) {
            Ok(idx) => self.properties[idx].value = value,
            Err(idx) => self.properties.insert(
                idx,
                ShaderProperty {
                    shader_property_id,
                    value,
                },
            ),
        }
    }

    #[inline]
    #[must_use]
    pub fn get_property_value(&self, shader_property_id: ShaderPropertyId) -> Option<i32> {
        self.position(shader_property_id)
            .ok()
            .map(|idx| self.properties[idx].value)
    }

    /// Returns `default` for unset properties.
    #[inline]
    #[must_use]
    pub fn get_property_value_or(&self, shader_property_id: ShaderPropertyId, default: i32) -> i32 {
        self.get_property_value(shader_property_id).unwrap_or(default)
    }

    #[inline]
    #[must_use]
    pub fn has_property_value(&self, shader_property_id: ShaderPropertyId) -> bool {
        self.position(shader_property_id).is_ok()
    }

    /// Remove a property; returns whether it was present.
    pub fn remove_property(&mut self, shader_property_id: ShaderPropertyId) -> bool {
        if let Ok(idx) = self.position(shader_property_id) {
            self.properties.remove(idx);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.properties.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ShaderProperty> {
        self.properties.iter()
    }

    /// Properties sorted by id, the order used for all hashing.
    #[inline]
    #[must_use]
    pub fn sorted_property_vector(&self) -> &[ShaderProperty] {
        &self.properties
    }

    /// Values from `other` override values in `self`.
    pub fn merge(&mut self, other: &ShaderProperties) {
        for property in &other.properties {
            self.set_property_value(property.shader_property_id, property.value);
        }
    }

    #[inline]
    fn position(&self, shader_property_id: ShaderPropertyId) -> Result<usize, usize> {
        self.properties
            .binary_search_by_key(&shader_property_id, |p| p.shader_property_id)
    }
}

impl From<&[(&str, i32)]> for ShaderProperties {
    fn from(properties: &[(&str, i32)]) -> Self {
        let mut result = Self::with_capacity(properties.len());
        for (name, value) in properties {
            result.set(name, *value);
        }
        result
    }
}
