//! Shader property combination enumeration.
//!
//! Mixed-radix counter over the shader properties of a material blueprint:
//! each boolean property is a digit of radix 2, each integer property a digit
//! of radix `number_of_values`. Every state of the counter yields one
//! [`ShaderProperties`] in which only the non-zero digits are set, so the
//! result is already in the optimized form the caches key on.
//!
//! ```rust,ignore
//! // USE_SKINNING ∈ {0, 1}, NUM_LIGHTS ∈ {0, 1, 2}
//! let all: Vec<_> = ShaderCombinationIterator::from_material_blueprint(&blueprint, false).collect();
//! assert_eq!(all.len(), 6);
//! ```

use smallvec::SmallVec;

use crate::resources::{MaterialBlueprint, ShaderProperties};
use crate::utils::ShaderPropertyId;

#[derive(Debug, Clone, Default)]
pub struct ShaderCombinationIterator {
    /// `(property, radix)`
    digits: SmallVec<[(ShaderPropertyId, u32); 8]>,
    values: SmallVec<[u32; 8]>,
    exhausted: bool,
}

impl ShaderCombinationIterator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties of `material_blueprint`, optionally only the mandatory ones.
    #[must_use]
    pub fn from_material_blueprint(material_blueprint: &MaterialBlueprint, mandatory_only: bool) -> Self {
        let mut iterator = Self::new();
        for property in material_blueprint.shader_properties() {
            if !mandatory_only || property.is_mandatory() {
                iterator.add_property(property.shader_property_id, property.number_of_values());
            }
        }
        iterator
    }

    /// A radix of 0 is treated as 1.
    pub fn add_property(&mut self, shader_property_id: ShaderPropertyId, number_of_values: u32) {
        self.digits.push((shader_property_id, number_of_values.max(1)));
        self.values.push(0);
    }

    /// Total number of combinations, saturating.
    #[must_use]
    pub fn number_of_combinations(&self) -> u64 {
        self.digits
            .iter()
            .fold(1u64, |count, (_, radix)| count.saturating_mul(u64::from(*radix)))
    }

    fn advance(&mut self) {
        for (value, (_, radix)) in self.values.iter_mut().zip(&self.digits) {
            *value += 1;
            if *value < *radix {
                return;
            }
            *value = 0;
        }
        self.exhausted = true;
    }
}

impl Iterator for ShaderCombinationIterator {
    type Item = ShaderProperties;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let mut properties = ShaderProperties::with_capacity(self.digits.len());
        for ((shader_property_id, _), &value) in self.digits.iter().zip(&self.values) {
            if value != 0 {
                properties.set_property_value(*shader_property_id, i32::try_from(value).unwrap_or(i32::MAX));
            }
        }
        self.advance();
        Some(properties)
    }
}
