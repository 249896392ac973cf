use std::path::PathBuf;

/// Errors that can occur across Warden.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary crate renders it through `miette` at the boundary.
///
/// Per-task oracle and stage failures never surface here: they are contained
/// by the audit pipeline and turned into error findings. Only failures that
/// make the whole run impossible (unreadable input, bad configuration) do.
///
/// # Examples
///
/// ```
/// use warden_core::WardenError;
///
/// let err = WardenError::Config("concurrency must be at least 1".into());
/// assert!(err.to_string().contains("concurrency"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum WardenError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(warden::config), help("check your .warden.toml and CLI flags"))]
    Config(String),

    /// An input document could not be read. Fatal to the whole run.
    #[error("failed to read source document {}: {source}", .path.display())]
    #[diagnostic(code(warden::source))]
    SourceRead {
        /// Path of the unreadable document.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Oracle client construction or transport setup error.
    #[error("oracle error: {0}")]
    #[diagnostic(code(warden::oracle))]
    Oracle(String),

    /// Audit log write failure.
    #[error("audit log error: {0}")]
    AuditLog(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(warden::config))]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}
