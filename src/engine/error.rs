use thiserror::Error;

/// Kind of catalog or booking entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Restaurant,
    Sector,
    Table,
    Reservation,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Restaurant => "restaurant",
            Entity::Sector => "sector",
            Entity::Table => "table",
            Entity::Reservation => "reservation",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("outside service window")]
    OutOfWindow,
    #[error("no table available for this party and slot")]
    NoCapacity,
    #[error("customer already has a reservation at this time")]
    DuplicateBooking,
    #[error("{kind} not found: {id}")]
    NotFound { kind: Entity, id: String },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: Entity, id: String },
    #[error("timed out waiting for the slot queue")]
    QueueTimeout,
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(msg.into())
    }

    pub fn not_found(kind: Entity, id: impl Into<String>) -> Self {
        EngineError::NotFound { kind, id: id.into() }
    }

    /// Stable machine-readable code for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::OutOfWindow => "outside_service_window",
            EngineError::NoCapacity => "no_capacity",
            EngineError::DuplicateBooking => "duplicate_reservation",
            EngineError::NotFound { .. } => "not_found",
            EngineError::AlreadyExists { .. } => "already_exists",
            EngineError::QueueTimeout => "queue_timeout",
            EngineError::Storage(_) => "storage_error",
        }
    }

    /// Only these may be retried by a caller; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::QueueTimeout | EngineError::Storage(_))
    }
}
