//! Utility Module
//!
//! - [`hash`]: FNV-1a folding and xxh3 helpers used for every cache key
//! - [`string_id`]: deterministic name → id mapping
//!
//! ```rust,ignore
//! use myth_pipeline::utils::StringId;
//!
//! let a = StringId::new("USE_NORMAL_MAP");
//! let b = StringId::new("USE_NORMAL_MAP");
//! assert_eq!(a, b); // stable across runs, unlike interned symbols
//! ```

pub mod hash;
pub mod string_id;

pub use string_id::{AssetId, ShaderPieceId, ShaderPropertyId, StringId};
