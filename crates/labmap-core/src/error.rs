use thiserror::Error;

/// Error type for labmap core operations.
#[derive(Debug, Error)]
pub enum LabError {
    /// Parent links loop back on themselves.
    #[error("cyclic topology: {}", path.join(" -> "))]
    CyclicTopology { path: Vec<String> },
    /// A node is reachable through more than one parent.
    #[error("node '{id}' is attached to more than one parent")]
    SharedNode { id: String },
    #[error("lab '{0}' not found")]
    NotFound(String),
    #[error("layout '{0}' not found")]
    LayoutNotFound(String),
    #[error("invalid lab document: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}
