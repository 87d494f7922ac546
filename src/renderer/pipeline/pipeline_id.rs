//! Strongly-typed cache identifiers.
//!
//! Thin `Copy` wrappers around the FNV-1a / xxh3 values that key the shader,
//! program and pipeline state caches. Distinct newtypes prevent mixing up a
//! shader combination id with a program cache id even though both are `u32`.

use std::fmt;

macro_rules! define_cache_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $inner);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn id(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

define_cache_id!(
    /// Per-stage identity of (shader blueprint, stage, referenced shader
    /// properties, dynamic shader pieces).
    ShaderCombinationId(u32)
);
define_cache_id!(
    /// Key of the shader cache manager. Equal to the stage's
    /// [`ShaderCombinationId`].
    ShaderCacheId(u32)
);
define_cache_id!(
    /// Fold of all per-stage shader combination ids.
    ProgramCacheId(u32)
);
define_cache_id!(
    /// Key of a material blueprint's pipeline state caches.
    PipelineStateSignatureId(u32)
);
define_cache_id!(
    /// xxh3-128 of generated shader source, seeded with the stage index.
    ShaderSourceCodeId(u128)
);

impl From<ShaderCombinationId> for ShaderCacheId {
    #[inline]
    fn from(id: ShaderCombinationId) -> Self {
        Self(id.0)
    }
}
