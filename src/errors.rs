use thiserror::Error;

/// Error taxonomy for the HFP engine. Each variant is a distinct
/// failure *kind*, not a wrapper around someone else's type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HfpError {
    /// Operation requires `connection = connected`.
    #[error("not connected to a phone")]
    NotConnected,

    /// Precondition violation on an argument (e.g. bad DTMF digit).
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// SLC setup rejected, lost, or timed out.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The underlying platform/transport call returned a non-success status.
    #[error("transport error ({0})")]
    TransportError(String),

    /// Produced only internally by the AT parser; never returned across the
    /// parser boundary (the parser returns `Option<T>` instead — see
    /// `parser.rs`). Kept so a dropped line can still be logged with a
    /// shared error type.
    #[error("failed to parse AT response: {0}")]
    ParseError(String),

    /// Controller Adapter input validation failure or unavailable capability
    /// (e.g. TTS not configured).
    #[error("{0}")]
    ToolError(String),
}

/// Errors from loading/saving the CLI shell's configuration file. Kept
/// separate from [`HfpError`] because config I/O is an ambient CLI concern,
/// not an engine concern — the engine never touches the filesystem.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {path}.\nRun `phonebt config init` to create one.")]
    NotFound { path: String },

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialise config file: {0}")]
    Serialize(#[from] toml::ser::Error),
}
