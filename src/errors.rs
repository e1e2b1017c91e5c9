//! Error Types
//!
//! This module defines the error types used throughout the rendering core.
//!
//! # Overview
//!
//! The main error type [`StrataError`] covers all failure modes including:
//! - GPU initialization failures
//! - Shader compilation failures
//! - Asset streaming and decoding errors
//! - Resource allocation errors
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, StrataError>`.
//!
//! Per the frame-loop contract, errors never unwind across a frame
//! boundary: [`crate::renderer::DeferredRenderer::tick`] catches and logs
//! at its top, and the streaming pipeline reports errors through task
//! results instead of panicking into the render thread.

use thiserror::Error;

/// The main error type for the Strata rendering core.
#[derive(Error, Debug)]
pub enum StrataError {
    // ========================================================================
    // GPU & Rendering Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// The device was lost mid-frame. Fatal: the frame loop tears down.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// Window system error.
    #[error("Window system error: {0}")]
    WindowError(#[from] raw_window_handle::HandleError),

    /// Failed to acquire the swapchain back buffer.
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Shader failed to compile at startup. Fatal.
    #[error("Shader compile error in '{name}': {detail}")]
    ShaderCompileFailed {
        /// Shader source name
        name: String,
        /// Compiler diagnostics
        detail: String,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A GPU allocation failed; the submission is dropped and rendering
    /// continues.
    #[error("GPU resource allocation failed: {0}")]
    AllocationFailed(String),

    /// The geometry pool has no free range large enough.
    #[error("Geometry pool exhausted: requested {requested} elements")]
    PoolExhausted {
        /// Requested element count
        requested: u32,
    },

    // ========================================================================
    // Streaming Errors
    // ========================================================================
    /// The requested asset was not found on disk.
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// No importer matches the asset's file extension.
    #[error("No importer for asset: {0}")]
    MissingImporter(String),

    /// The asset bytes could not be parsed.
    #[error("Corrupt asset '{path}': {detail}")]
    CorruptAsset {
        /// Source path
        path: String,
        /// Parse diagnostics
        detail: String,
    },

    /// Image decoding error.
    #[error("Image decode error: {0}")]
    ImageDecodeError(String),

    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The streaming load was cancelled by its token.
    #[error("Streaming load cancelled")]
    Cancelled,
}

impl From<image::ImageError> for StrataError {
    fn from(err: image::ImageError) -> Self {
        StrataError::ImageDecodeError(err.to_string())
    }
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;
