use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use plugin::Error;
use serde::{Deserialize, Serialize};

/// The wire form of an error: `{kind, message}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    pub fn of(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    /// Reconstructs a taxonomy error client-side. Unknown kinds fall
    /// back to PluginError so the message survives.
    pub fn into_error(self) -> Error {
        match self.kind.as_str() {
            "not-found" => Error::NotFound { path: self.message },
            "bad-request" => Error::BadRequest(self.message),
            "syntax-error" => Error::SyntaxError(self.message),
            "cancelled" => Error::Cancelled,
            _ => Error::PluginError(self.message),
        }
    }
}

/// An error leaving the HTTP layer. 4xx for the caller's mistakes,
/// 5xx for everything else.
#[derive(Debug)]
pub struct ApiError(pub Error);

pub fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::UnsupportedAction { .. }
        | Error::DuplicateCName { .. }
        | Error::BadRequest(_)
        | Error::MatchError(_)
        | Error::SyntaxError(_)
        | Error::IncompleteOperator(_)
        | Error::EmptyExpression(_)
        | Error::UnknownToken(_) => StatusCode::BAD_REQUEST,
        Error::PluginError(_) | Error::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        (status, Json(ErrorBody::of(&self.0))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            status_of(&Error::NotFound { path: "/x".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(&Error::BadRequest("".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&Error::SyntaxError("".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&Error::PluginError("".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bodies_round_trip_the_kind() {
        let err = Error::BadRequest("recurse is required".into());
        let body = ErrorBody::of(&err);
        assert_eq!(body.kind, "bad-request");
        assert!(matches!(body.into_error(), Error::BadRequest(_)));
    }
}
