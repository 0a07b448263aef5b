use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Standard error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Structured details where the error kind carries them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Reference to the catalog row a stock failure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRef {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
}

impl std::fmt::Display for StockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.variant_id {
            Some(variant_id) => write!(f, "product {} variant {}", self.product_id, variant_id),
            None => write!(f, "product {}", self.product_id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: StockRef,
        requested: i32,
        available: i32,
    },

    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidInput(_) | Self::EmptyCart | Self::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Conflict(_) | Self::InsufficientStock { .. } => StatusCode::CONFLICT,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Storage-layer errors return a
    /// generic message so no backend detail leaks to clients.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Structured payload for error kinds a client can act on.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock {
                item,
                requested,
                available,
            } => Some(json!({
                "product_id": item.product_id,
                "variant_id": item.variant_id,
                "requested": requested,
                "available": available,
            })),
            Self::InvalidTransition { from, to } => Some(json!({
                "from": from,
                "to": to,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_maps_to_conflict_with_details() {
        let err = ServiceError::InsufficientStock {
            item: StockRef {
                product_id: Uuid::new_v4(),
                variant_id: None,
            },
            requested: 3,
            available: 2,
        };

        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let details = err.details().expect("details expected");
        assert_eq!(details["requested"], 3);
        assert_eq!(details["available"], 2);
    }

    #[test]
    fn invalid_transition_reports_both_states() {
        let err = ServiceError::InvalidTransition {
            from: "pending".into(),
            to: "shipped".into(),
        };

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("'pending'"));
        assert!(err.to_string().contains("'shipped'"));
    }

    #[test]
    fn database_errors_do_not_leak_detail() {
        let err = ServiceError::DatabaseError(sea_orm::error::DbErr::Custom(
            "connection refused at 10.0.0.1".into(),
        ));

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.response_message(), "Database error");
    }

    #[test]
    fn stock_ref_display_includes_variant_when_present() {
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();

        let bare = StockRef {
            product_id,
            variant_id: None,
        };
        assert!(!bare.to_string().contains("variant"));

        let with_variant = StockRef {
            product_id,
            variant_id: Some(variant_id),
        };
        assert!(with_variant.to_string().contains(&variant_id.to_string()));
    }
}
