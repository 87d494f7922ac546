//! Runtime Settings
//!
//! Configuration of the pipeline runtime, loadable from JSON.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_pipeline::renderer::{RendererRuntimeSettings, PipelineStateCompilerSettings};
//!
//! // Default: asynchronous compilation with two compiler threads
//! let settings = RendererRuntimeSettings::default();
//!
//! // Tooling: compile everything inline
//! let settings = RendererRuntimeSettings {
//!     compiler: PipelineStateCompilerSettings {
//!         asynchronous_compilation: false,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//!
//! // Partial JSON, missing fields keep their defaults
//! let settings = RendererRuntimeSettings::from_json_str(r#"{ "compiler": { "number_of_compiler_threads": 4 } }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::Result;

// ---------------------------------------------------------------------------
// PipelineStateCompilerSettings
// ---------------------------------------------------------------------------

/// | Field                       | Description                               | Default |
/// |-----------------------------|-------------------------------------------|---------|
/// | `asynchronous_compilation`  | Compile PSO misses on background threads  | `true`  |
/// | `number_of_compiler_threads`| Compiler pool size, at least 1            | `2`     |
/// | `flush_poll_interval_ms`    | Sleep between polls while flushing        | `1`     |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineStateCompilerSettings {
    pub asynchronous_compilation: bool,
    pub number_of_compiler_threads: usize,
    pub flush_poll_interval_ms: u64,
}

impl Default for PipelineStateCompilerSettings {
    fn default() -> Self {
        Self {
            asynchronous_compilation: true,
            number_of_compiler_threads: 2,
            flush_poll_interval_ms: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// RendererRuntimeSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererRuntimeSettings {
    pub compiler: PipelineStateCompilerSettings,

    /// Dump every generated shader source at debug log level.
    pub debug_print_generated_source: bool,
}

impl RendererRuntimeSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
