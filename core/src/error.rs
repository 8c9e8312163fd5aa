//! Error types for the strategy tree, compressor and evaluator

use thiserror::Error;

/// Main error type for tree and evaluation operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// The tree contains a cycle reachable from the root
    #[error("cyclic tree: node {0} reachable from itself")]
    CyclicTree(String),

    /// A branch or gate references a node id that does not exist
    #[error("missing node: {0}")]
    MissingNode(String),

    /// An indicator or function node named a slot that isn't registered
    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),

    /// Structural error surfaced while validating or compressing a tree
    #[error("structural error: {0}")]
    StructuralError(String),

    /// Configuration error (invalid settings passed to the evaluator)
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A ticker required by the tree has no price history at all
    #[error("data missing for ticker: {0}")]
    DataMissing(String),

    /// A ticker has price history, but not enough to satisfy a lookback
    #[error("insufficient data for ticker {ticker}: need {needed} bars, have {have}")]
    DataInsufficient {
        ticker: String,
        needed: usize,
        have: usize,
    },

    /// Error raised while evaluating a node (carries the offending node id)
    #[error("evaluator error at node {node_id}: {message}")]
    EvaluatorError { node_id: String, message: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// I/O error (price source reads, config reads)
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),

    /// CSV parsing error from the columnar price adapter
    #[error("csv error: {0}")]
    CsvError(#[from] csv::Error),

    /// Run was cancelled cooperatively between trading days
    #[error("backtest cancelled")]
    Cancelled,
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
