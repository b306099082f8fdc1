//! JSON error surface for the API.
//!
//! Every API failure renders `{"success": false, "error": <message>}` with a
//! matching status. Internal details travel in a response extension and are
//! added to the body as `"details"` only outside production, by the
//! [`expose_error_details`] layer.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gradebook_platform_access::{AdminError, GateError, RefreshError, StoreError};
use serde_json::json;
use std::fmt;

/// API error.
#[derive(Debug)]
pub enum ApiError {
    /// The request is malformed.
    BadRequest { message: String },
    /// No authenticated session.
    Unauthenticated,
    /// The session's role may not reach this route.
    Forbidden { details: String },
    /// The resource does not exist.
    NotFound { message: String },
    /// The resource already exists.
    Conflict { message: String },
    /// The provider grant is gone; the user must sign in again.
    ReauthRequired,
    /// The identity provider failed.
    BadGateway { details: String },
    /// Anything else.
    Internal { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.public_message())
    }
}

impl std::error::Error for ApiError {}

/// Internal error text attached to an error response.
#[derive(Debug, Clone)]
pub struct ErrorDetails {
    message: String,
    details: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::ReauthRequired => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::BadRequest { message } | Self::NotFound { message } | Self::Conflict { message } => {
                message.clone()
            }
            Self::Unauthenticated => "Not authenticated".to_string(),
            Self::Forbidden { .. } => "Insufficient permissions".to_string(),
            Self::ReauthRequired => "Re-authentication with Google is required".to_string(),
            Self::BadGateway { .. } => "Identity provider error".to_string(),
            Self::Internal { .. } => "Internal server error".to_string(),
        }
    }

    fn details(&self) -> Option<&str> {
        match self {
            Self::Forbidden { details } | Self::BadGateway { details } | Self::Internal { details } => {
                Some(details)
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.public_message();

        match &self {
            Self::Internal { details } => tracing::error!(error = %details, "internal error"),
            Self::BadGateway { details } => tracing::error!(error = %details, "identity provider error"),
            Self::Forbidden { details } => tracing::debug!(%details, "forbidden"),
            _ => {}
        }

        let mut response = (status, Json(json!({ "success": false, "error": message }))).into_response();
        if let Some(details) = self.details() {
            response.extensions_mut().insert(ErrorDetails {
                message,
                details: details.to_string(),
            });
        }
        response
    }
}

/// Adds `"details"` to error bodies. Mounted only outside production.
pub async fn expose_error_details(response: Response) -> Response {
    let Some(ErrorDetails { message, details }) = response.extensions().get::<ErrorDetails>().cloned()
    else {
        return response;
    };
    let status = response.status();
    (
        status,
        Json(json!({ "success": false, "error": message, "details": details })),
    )
        .into_response()
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Unauthenticated => Self::Unauthenticated,
            forbidden @ GateError::Forbidden { .. } => Self::Forbidden {
                details: forbidden.to_string(),
            },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal {
            details: err.to_string(),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::InvalidInput { reason } => Self::BadRequest { message: reason },
            AdminError::Conflict { .. } => Self::Conflict {
                message: "A user with this email is already invited or active".to_string(),
            },
            AdminError::NotFound { .. } => Self::NotFound {
                message: "User not found".to_string(),
            },
            AdminError::Store(err) => err.into(),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::ReauthRequired { .. } => Self::ReauthRequired,
            RefreshError::Provider { reason } => Self::BadGateway { details: reason },
            RefreshError::Cipher(err) => {
                tracing::error!(error = %err, "stored refresh token failed to decrypt");
                Self::Internal {
                    details: err.to_string(),
                }
            }
            RefreshError::Store(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebook_platform_access::{CipherError, Role, RoleSet};
    use http_body_util::BodyExt;

    async fn render(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn gate_errors_map_to_401_and_403() {
        let (status, json) = render(ApiError::from(GateError::Unauthenticated).into_response()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json, json!({"success": false, "error": "Not authenticated"}));

        let forbidden = GateError::Forbidden {
            role: Role::Student,
            allowed: RoleSet::admin(),
        };
        let (status, json) = render(ApiError::from(forbidden).into_response()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["success"], false);
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn internal_errors_hide_details_until_exposed() {
        let err = ApiError::from(StoreError::Backend {
            reason: "password authentication failed".to_string(),
        });
        let response = err.into_response();
        let (status, json) = render(expose_error_details(response).await).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Internal server error");
        assert!(
            json["details"]
                .as_str()
                .unwrap()
                .contains("password authentication failed")
        );

        let err = ApiError::from(StoreError::Backend {
            reason: "password authentication failed".to_string(),
        });
        let (_, json) = render(err.into_response()).await;
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn admin_errors_map_to_client_statuses() {
        let cases = [
            (
                AdminError::InvalidInput {
                    reason: "email and role are required".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                AdminError::Conflict {
                    email: "a@x.com".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                AdminError::NotFound {
                    id: "usr_1".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, expected) in cases {
            let (status, json) = render(ApiError::from(err).into_response()).await;
            assert_eq!(status, expected);
            assert_eq!(json["success"], false);
        }
    }

    #[tokio::test]
    async fn refresh_errors_stay_distinct() {
        let (status, _) = render(
            ApiError::from(RefreshError::ReauthRequired {
                user_id: gradebook_core::UserId::new(),
            })
            .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            render(ApiError::from(RefreshError::Cipher(CipherError::Integrity)).into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
