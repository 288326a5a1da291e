use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::broker::{BrokerError, ResourceKind};

#[derive(Debug, Clone)]
pub enum CqsError {
    QueueAlreadyExists(String),
    QueueDoesNotExist(String),
    InvalidParameterValue(String),
    ReceiptHandleIsInvalid(String),
    EmptyBatchRequest(String),
    TooManyEntriesInBatchRequest(String),
    BatchEntryIdsNotDistinct(String),
    InvalidBatchEntryId(String),
    RequestThrottled(String),
    InternalError(String),
    InvalidAction(String),
}

impl CqsError {
    pub fn error_code(&self) -> &str {
        match self {
            CqsError::QueueAlreadyExists(_) => "QueueAlreadyExists",
            CqsError::QueueDoesNotExist(_) => "QueueDoesNotExist",
            CqsError::InvalidParameterValue(_) => "InvalidParameterValue",
            CqsError::ReceiptHandleIsInvalid(_) => "ReceiptHandleIsInvalid",
            CqsError::EmptyBatchRequest(_) => "EmptyBatchRequest",
            CqsError::TooManyEntriesInBatchRequest(_) => "TooManyEntriesInBatchRequest",
            CqsError::BatchEntryIdsNotDistinct(_) => "BatchEntryIdsNotDistinct",
            CqsError::InvalidBatchEntryId(_) => "InvalidBatchEntryId",
            CqsError::RequestThrottled(_) => "RequestThrottled",
            CqsError::InternalError(_) => "InternalError",
            CqsError::InvalidAction(_) => "InvalidAction",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CqsError::RequestThrottled(_) => StatusCode::FORBIDDEN,
            CqsError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CqsError::QueueAlreadyExists(m)
            | CqsError::QueueDoesNotExist(m)
            | CqsError::InvalidParameterValue(m)
            | CqsError::ReceiptHandleIsInvalid(m)
            | CqsError::EmptyBatchRequest(m)
            | CqsError::TooManyEntriesInBatchRequest(m)
            | CqsError::BatchEntryIdsNotDistinct(m)
            | CqsError::InvalidBatchEntryId(m)
            | CqsError::RequestThrottled(m)
            | CqsError::InternalError(m)
            | CqsError::InvalidAction(m) => m,
        }
    }

    /// Batch entries report failures inline; only server-side faults are
    /// not the sender's.
    pub fn sender_fault(&self) -> bool {
        !matches!(self, CqsError::InternalError(_))
    }
}

impl From<BrokerError> for CqsError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::NotFound {
                kind: ResourceKind::ReceiptHandle,
                id,
            } => CqsError::ReceiptHandleIsInvalid(format!(
                "The input receipt handle \"{id}\" is not a valid receipt handle."
            )),
            BrokerError::NotFound { .. } => CqsError::QueueDoesNotExist(
                "The specified queue does not exist.".into(),
            ),
            BrokerError::AlreadyExists(m) => CqsError::QueueAlreadyExists(m),
            BrokerError::InvalidParameter(m) => CqsError::InvalidParameterValue(m),
            BrokerError::Throttled(m) => CqsError::RequestThrottled(m),
            BrokerError::Internal(m) => CqsError::InternalError(m),
        }
    }
}

impl IntoResponse for CqsError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(code = self.error_code(), message = self.message(), "cqs request failed");
        } else {
            tracing::debug!(code = self.error_code(), message = self.message(), "cqs request rejected");
        }
        let body = json!({
            "__type": format!("com.amazonaws.sqs#{}", self.error_code()),
            "message": self.message(),
        });
        (self.status_code(), axum::Json(body)).into_response()
    }
}
