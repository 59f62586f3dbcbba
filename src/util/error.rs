//! Error types for the renderer.

use thiserror::Error;

/// Main error type for renderer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// WGSL failed to parse or validate
    #[error("Shader compilation failed ({label}): {message}")]
    ShaderCompile { label: String, message: String },

    /// Vertex and fragment stages do not fit together
    #[error("Shader link failed ({label}): {message}")]
    ShaderLink { label: String, message: String },

    /// Packed uniform data does not match the reflected block layout
    #[error("Uniform block '{block}' layout mismatch: {message}")]
    UniformLayout { block: String, message: String },

    /// Traversal stack in the shader is smaller than the BVH depth
    #[error("BVH traversal needs a stack of {required} entries, shader provides {available}")]
    StackDepth { required: u32, available: u32 },

    /// Mandatory GPU capability is missing
    #[error("GPU not supported: {0}")]
    Unsupported(String),

    /// Adapter, device or GPU object creation failed
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Scene data the renderer cannot consume
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Options (de)serialization error
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid scene error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidScene(msg.into())
    }
}

/// Result type alias for renderer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::StackDepth { required: 12, available: 8 };
        assert!(e.to_string().contains("12"));
        assert!(e.to_string().contains("8"));

        let e = Error::ShaderCompile { label: "tone_map".into(), message: "bad token".into() };
        assert!(e.to_string().contains("tone_map"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
