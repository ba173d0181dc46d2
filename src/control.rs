use actix_web::HttpResponse;
use derive_more::{Display, Error};

pub type Response = Result<HttpResponse, ApiError>;

/// Client-visible error taxonomy. Every variant renders as a structured JSON
/// body; per-row import errors never travel through here, they accumulate on
/// the job instead.
#[derive(Debug, Display, Error)]
pub enum ApiError {
    #[display("{message}")]
    #[error(ignore)]
    Validation { message: String },
    #[display("{message}")]
    #[error(ignore)]
    NotFound { message: String },
    #[display("{message}")]
    #[error(ignore)]
    Parse { message: String },
    #[display("{_0}")]
    #[error(ignore)]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl actix_web::error::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        log::warn!("{self:?}");
        let mut builder = match self {
            ApiError::NotFound { .. } => HttpResponse::NotFound(),
            ApiError::Validation { .. } | ApiError::Parse { .. } => HttpResponse::BadRequest(),
            ApiError::Internal(_) => HttpResponse::InternalServerError(),
        };
        builder.json(serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;
    use actix_web::http::StatusCode;

    #[test]
    fn maps_variants_to_status_codes() {
        assert_eq!(
            ApiError::validation("x").error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("x").error_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::parse("x").error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom"))
                .error_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn message_is_the_display_form() {
        let err = ApiError::validation("Yalnız .xlsx faylı qəbul edilir.");
        assert_eq!(err.to_string(), "Yalnız .xlsx faylı qəbul edilir.");
    }
}
