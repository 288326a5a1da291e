use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quick_xml::escape::escape;
use uuid::Uuid;

use crate::broker::BrokerError;

#[derive(Debug, Clone)]
pub enum CnsError {
    NotFound(String),
    InvalidParameter(String),
    InvalidAction(String),
    Throttled(String),
    InternalError(String),
}

impl CnsError {
    fn error_code(&self) -> &str {
        match self {
            CnsError::NotFound(_) => "NotFound",
            CnsError::InvalidParameter(_) => "InvalidParameter",
            CnsError::InvalidAction(_) => "InvalidAction",
            CnsError::Throttled(_) => "Throttled",
            CnsError::InternalError(_) => "InternalError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CnsError::NotFound(_) => StatusCode::NOT_FOUND,
            CnsError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> &str {
        match self {
            CnsError::NotFound(m)
            | CnsError::InvalidParameter(m)
            | CnsError::InvalidAction(m)
            | CnsError::Throttled(m)
            | CnsError::InternalError(m) => m,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            CnsError::InternalError(_) => "Receiver",
            _ => "Sender",
        }
    }
}

impl From<BrokerError> for CnsError {
    fn from(err: BrokerError) -> Self {
        let message = err.to_string();
        match err {
            BrokerError::NotFound { .. } => CnsError::NotFound(message),
            BrokerError::AlreadyExists(_) | BrokerError::InvalidParameter(_) => {
                CnsError::InvalidParameter(message)
            }
            BrokerError::Throttled(_) => CnsError::Throttled(message),
            BrokerError::Internal(_) => CnsError::InternalError(message),
        }
    }
}

impl IntoResponse for CnsError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(code = self.error_code(), message = self.message(), "cns request failed");
        } else {
            tracing::debug!(code = self.error_code(), message = self.message(), "cns request rejected");
        }
        let body = format!(
            r#"<ErrorResponse xmlns="http://sns.amazonaws.com/doc/2010-03-31/">
  <Error>
    <Type>{}</Type>
    <Code>{}</Code>
    <Message>{}</Message>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
            self.error_type(),
            self.error_code(),
            escape(self.message()),
            Uuid::new_v4(),
        );
        (self.status_code(), [("content-type", "text/xml")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ResourceKind;

    #[test]
    fn broker_errors_map_to_query_protocol_codes() {
        let not_found: CnsError = BrokerError::not_found(ResourceKind::Topic, "arn").into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.error_code(), "NotFound");

        let invalid: CnsError = BrokerError::invalid("bad").into();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.error_code(), "InvalidParameter");

        let internal: CnsError = BrokerError::Internal("boom".into()).into();
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.error_type(), "Receiver");
    }
}
