//! Error Types
//!
//! This module defines the error types used throughout the pipeline runtime.
//!
//! # Overview
//!
//! The main error type [`PipelineError`] covers:
//! - Shader template (blueprint / piece) build failures
//! - Backend shader, program and pipeline state creation failures
//! - Persisted shader cache decoding errors
//! - Settings parsing errors
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, PipelineError>`.
//!
//! Failures inside the asynchronous compiler never cross a thread boundary as
//! panics: they are logged and the affected pipeline state cache receives a
//! null pipeline state at dispatch.

use thiserror::Error;

use crate::backend::{ShaderLanguage, ShaderType};
use crate::utils::AssetId;

/// The main error type for the pipeline runtime.
#[derive(Error, Debug)]
pub enum PipelineError {
    // ========================================================================
    // Shader Build Errors
    // ========================================================================
    /// A shader blueprint or shader piece contains a malformed directive.
    ///
    /// These are asset bugs and are never recovered from.
    #[error("Shader build error in '{asset}': {message}")]
    ShaderBuild {
        /// Name of the blueprint or piece being processed
        asset: String,
        /// What went wrong
        message: String,
    },

    /// A shader blueprint or shader piece referenced by id is not registered.
    #[error("Shader asset not found: {0}")]
    AssetNotFound(AssetId),

    /// A shader blueprint and a shader piece would share one asset id.
    #[error("Shader asset '{name}' is already registered as a {existing}")]
    AssetNameConflict {
        name: String,
        /// Kind of the asset already holding the id
        existing: &'static str,
    },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// The backend rejected shader source code or bytecode.
    #[error("{shader_type} shader compilation failed: {log}")]
    ShaderCompilation {
        /// Stage that failed
        shader_type: ShaderType,
        /// Backend compile log
        log: String,
    },

    /// The backend has no support for this shader stage.
    #[error("Unsupported shader type: {0}")]
    UnsupportedShaderType(ShaderType),

    /// A stage shader was created under a different shader language.
    #[error("Shader language mismatch: expected {expected}, found {found}")]
    ShaderLanguageMismatch {
        expected: ShaderLanguage,
        found: ShaderLanguage,
    },

    /// A shader was placed into a stage slot of another type.
    #[error("Shader type mismatch: {found} shader in {slot} slot")]
    ShaderTypeMismatch {
        slot: ShaderType,
        found: ShaderType,
    },

    /// Linking stage shaders into a program failed.
    #[error("Program creation failed: {0}")]
    ProgramCreation(String),

    /// Creating the backend pipeline state object failed.
    #[error("Pipeline state creation failed: {0}")]
    PipelineStateCreation(String),

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// The persisted shader cache blob is corrupt or of another version.
    #[error("Shader cache format error: {0}")]
    CacheFormat(String),

    /// Settings could not be parsed.
    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
