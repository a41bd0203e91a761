use std::error::Error;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::model::{DrugId, PharmacyId};

/// Result type used by every core component.
pub type LocatorResult<T> = Result<T, LocatorError>;

/// Errors surfaced by the search, inventory, alert and rating components.
///
/// Validation variants are returned to the caller as-is and never retried.
/// `StoreUnavailable` means the persistence collaborator could not be
/// reached; callers fail fast rather than serving stale state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocatorError {
    #[error("invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("invalid radius: {radius_km} km")]
    InvalidRadius { radius_km: f64 },

    #[error("invalid price: {message}")]
    InvalidPrice { message: String },

    #[error("invalid quantity: {message}")]
    InvalidQuantity { message: String },

    #[error("drug {0} not found in catalog")]
    DrugNotFound(DrugId),

    #[error("no inventory record for pharmacy {pharmacy_id}, drug {drug_id}")]
    NotFound {
        pharmacy_id: PharmacyId,
        drug_id: DrugId,
    },

    #[error("insufficient stock: {available} available, adjustment of {requested} requested")]
    NegativeStock { available: u32, requested: i64 },

    #[error("invalid score {0}: must be between 1 and 5")]
    InvalidScore(i64),

    #[error("corrupt record: {message}")]
    CorruptRecord { message: String },

    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },
}

impl LocatorError {
    pub fn invalid_price(message: impl Into<String>) -> Self {
        Self::InvalidPrice { message: message.into() }
    }

    pub fn invalid_quantity(message: impl Into<String>) -> Self {
        Self::InvalidQuantity { message: message.into() }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptRecord { message: message.into() }
    }

    pub fn not_found(pharmacy_id: PharmacyId, drug_id: DrugId) -> Self {
        Self::NotFound { pharmacy_id, drug_id }
    }

    /// HTTP status used when the error reaches the request layer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCoordinate { .. }
            | Self::InvalidRadius { .. }
            | Self::InvalidPrice { .. }
            | Self::InvalidQuantity { .. }
            | Self::InvalidScore(_) => StatusCode::BAD_REQUEST,
            Self::DrugNotFound(_) | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::NegativeStock { .. } => StatusCode::CONFLICT,
            Self::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::CorruptRecord { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LocatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Errors from the persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<StoreError> for LocatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => LocatorError::StoreUnavailable { message },
            StoreError::Corrupt(message) => LocatorError::CorruptRecord { message },
        }
    }
}

/// Unified process-level error.
///
/// Covers everything that can stop the service from starting or serving:
/// bad configuration, an unreachable database, a failed bind.
#[derive(Debug)]
pub enum AppError {
    Config(String),
    Startup(String),
    Store(StoreError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Config error: {}", msg),
            AppError::Startup(msg) => write!(f, "Startup error: {}", msg),
            AppError::Store(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl Error for AppError {}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<LocatorError> for AppError {
    fn from(err: LocatorError) -> Self {
        AppError::Startup(err.to_string())
    }
}
