use thiserror::Error;
use uuid::Uuid;

/// Top-level error taxonomy (spec §7), grouped by surface. The `Display`
/// discriminant name doubles as the stable machine-readable code carried
/// alongside the human message at any HTTP boundary.
#[derive(Error, Debug)]
pub enum DestinyError {
    // --- Input errors (ingestion) — recorded per-entry, never fatal to the batch ---
    #[error("ParseError: {0}")]
    ParseError(String),

    #[error("SchemaViolation: {0}")]
    SchemaViolation(String),

    #[error("EmptyIdentifiers: reference has no identifiers")]
    EmptyIdentifiers,

    #[error("UnknownIdentifierType: {0}")]
    UnknownIdentifierType(String),

    // --- Conflict errors — local retry allowed where noted ---
    #[error("IdentifierCollision: {} colliding reference(s)", conflicting.len())]
    IdentifierCollision { conflicting: Vec<Uuid> },

    #[error("AmbiguousCollision: identifiers named {} distinct existing references", existing.len())]
    AmbiguousCollision { existing: Vec<Uuid> },

    #[error("DecisionStale: concurrent writer advanced the decision history for {reference_id}")]
    DecisionStale { reference_id: Uuid },

    // --- Upstream errors — retried with capped exponential backoff at the task bus layer ---
    #[error("StoreUnavailable: {0}")]
    StoreUnavailable(String),

    #[error("BlobUnavailable: {0}")]
    BlobUnavailable(String),

    #[error("TaskBusUnavailable: {0}")]
    TaskBusUnavailable(String),

    // --- Robot errors ---
    #[error("RobotGlobalError: {0}")]
    RobotGlobalError(String),

    #[error("RobotLinkedError: reference {reference_id}: {reason}")]
    RobotLinkedError { reference_id: Uuid, reason: String },

    // --- Internal invariant violations ---
    #[error("DecisionGraphCorruption: {0}")]
    DecisionGraphCorruption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl DestinyError {
    /// The stable machine-readable code for this error (the enum variant
    /// name), paired with the free-form human message per spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            DestinyError::ParseError(_) => "ParseError",
            DestinyError::SchemaViolation(_) => "SchemaViolation",
            DestinyError::EmptyIdentifiers => "EmptyIdentifiers",
            DestinyError::UnknownIdentifierType(_) => "UnknownIdentifierType",
            DestinyError::IdentifierCollision { .. } => "IdentifierCollision",
            DestinyError::AmbiguousCollision { .. } => "AmbiguousCollision",
            DestinyError::DecisionStale { .. } => "DecisionStale",
            DestinyError::StoreUnavailable(_) => "StoreUnavailable",
            DestinyError::BlobUnavailable(_) => "BlobUnavailable",
            DestinyError::TaskBusUnavailable(_) => "TaskBusUnavailable",
            DestinyError::RobotGlobalError(_) => "RobotGlobalError",
            DestinyError::RobotLinkedError { .. } => "RobotLinkedError",
            DestinyError::DecisionGraphCorruption(_) => "DecisionGraphCorruption",
            DestinyError::Config(_) => "Config",
            DestinyError::Validation(_) => "Validation",
            DestinyError::Anyhow(_) => "Internal",
        }
    }

    /// Transient I/O errors are the only ones the task bus should retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DestinyError::StoreUnavailable(_)
                | DestinyError::BlobUnavailable(_)
                | DestinyError::TaskBusUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DestinyError>;
