use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use percent_encoding::percent_decode_str;

use super::error::CqsError;
use super::types::*;
use crate::broker::queue::MAX_RECEIVE_BATCH;
use crate::broker::{Broker, BrokerError, Namespace, ReceiveOptions, ResourceKind};
use crate::credentials;

macro_rules! dispatch {
    ($ns:expr, $body:expr, $req_type:ty, $handler:ident) => {{
        let req: $req_type = serde_json::from_slice(&$body)
            .map_err(|e| CqsError::InvalidParameterValue(e.to_string()))?;
        let resp = $handler(&$ns, req).await?;
        Ok(Json(resp).into_response())
    }};
}

macro_rules! dispatch_empty {
    ($ns:expr, $body:expr, $req_type:ty, $handler:ident) => {{
        let req: $req_type = serde_json::from_slice(&$body)
            .map_err(|e| CqsError::InvalidParameterValue(e.to_string()))?;
        $handler(&$ns, req).await?;
        Ok(Json(serde_json::json!({})).into_response())
    }};
}

async fn handle_request(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<axum::response::Response, CqsError> {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CqsError::InvalidAction("Missing X-Amz-Target header".into()))?;

    let action = target.strip_prefix("AmazonSQS.").ok_or_else(|| {
        CqsError::InvalidAction(format!("Invalid target: {target}"))
    })?;

    let access_key = credentials::access_key(&headers).unwrap_or_default();
    let ns = broker.namespace(&access_key).await;
    tracing::debug!(action, account_id = ns.account_id(), "cqs request");

    match action {
        "CreateQueue" => dispatch!(ns, body, CreateQueueRequest, create_queue),
        "DeleteQueue" => dispatch_empty!(ns, body, QueueUrlRequest, delete_queue),
        "GetQueueUrl" => dispatch!(ns, body, GetQueueUrlRequest, get_queue_url),
        "ListQueues" => dispatch!(ns, body, ListQueuesRequest, list_queues),
        "GetQueueAttributes" => {
            dispatch!(ns, body, GetQueueAttributesRequest, get_queue_attributes)
        }
        "SetQueueAttributes" => {
            dispatch_empty!(ns, body, SetQueueAttributesRequest, set_queue_attributes)
        }
        "PurgeQueue" => dispatch_empty!(ns, body, QueueUrlRequest, purge_queue),
        "SendMessage" => dispatch!(ns, body, SendMessageRequest, send_message),
        "SendMessageBatch" => {
            dispatch!(ns, body, SendMessageBatchRequest, send_message_batch)
        }
        "ReceiveMessage" => {
            dispatch!(ns, body, ReceiveMessageRequest, receive_message)
        }
        "DeleteMessage" => {
            dispatch_empty!(ns, body, DeleteMessageRequest, delete_message)
        }
        "DeleteMessageBatch" => {
            dispatch!(ns, body, DeleteMessageBatchRequest, delete_message_batch)
        }
        "ChangeMessageVisibility" => {
            dispatch_empty!(
                ns,
                body,
                ChangeMessageVisibilityRequest,
                change_message_visibility
            )
        }
        "ChangeMessageVisibilityBatch" => {
            dispatch!(
                ns,
                body,
                ChangeMessageVisibilityBatchRequest,
                change_message_visibility_batch
            )
        }
        _ => Err(CqsError::InvalidAction(format!(
            "Unknown action: {action}"
        ))),
    }
}

// ── request helpers ────────────────────────────────────────────────────

/// Queue urls may arrive percent-encoded when clients build them by hand.
fn queue_url(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn seconds(name: &str, value: Option<i32>) -> Result<Option<u32>, CqsError> {
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| {
                CqsError::InvalidParameterValue(format!("{name} must not be negative: {v}"))
            })
        })
        .transpose()
}

fn validate_batch_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Result<(), CqsError> {
    let ids: Vec<&str> = ids.collect();
    if ids.is_empty() {
        return Err(CqsError::EmptyBatchRequest(
            "There should be at least one entry in the request.".into(),
        ));
    }
    if ids.len() > MAX_RECEIVE_BATCH {
        return Err(CqsError::TooManyEntriesInBatchRequest(format!(
            "Maximum number of entries per request are {MAX_RECEIVE_BATCH}. You have sent {}.",
            ids.len()
        )));
    }
    let mut seen = HashSet::new();
    for id in ids {
        let valid = !id.is_empty()
            && id.len() <= 80
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CqsError::InvalidBatchEntryId(format!(
                "A batch entry id can only contain alphanumeric characters, hyphens and underscores: {id}"
            )));
        }
        if !seen.insert(id) {
            return Err(CqsError::BatchEntryIdsNotDistinct(format!(
                "Id {id} repeated."
            )));
        }
    }
    Ok(())
}

/// A missing queue fails the whole batch; anything else fails one entry.
fn batch_failure(id: String, err: BrokerError) -> Result<BatchResultErrorEntry, CqsError> {
    if matches!(
        err,
        BrokerError::NotFound {
            kind: ResourceKind::Queue,
            ..
        }
    ) {
        return Err(err.into());
    }
    let err = CqsError::from(err);
    Ok(BatchResultErrorEntry {
        id,
        code: err.error_code().to_string(),
        message: err.message().to_string(),
        sender_fault: err.sender_fault(),
    })
}

// ── action handlers ────────────────────────────────────────────────────

async fn create_queue(
    ns: &Namespace,
    req: CreateQueueRequest,
) -> Result<CreateQueueResponse, CqsError> {
    let attributes = req.attributes.unwrap_or_default();
    let queue_url = ns.create_queue(&req.queue_name, &attributes).await?;
    Ok(CreateQueueResponse { queue_url })
}

async fn delete_queue(ns: &Namespace, req: QueueUrlRequest) -> Result<(), CqsError> {
    Ok(ns.delete_queue(&queue_url(&req.queue_url)).await?)
}

async fn get_queue_url(
    ns: &Namespace,
    req: GetQueueUrlRequest,
) -> Result<GetQueueUrlResponse, CqsError> {
    let queue_url = ns.get_queue_url(&req.queue_name).await?;
    Ok(GetQueueUrlResponse { queue_url })
}

async fn list_queues(
    ns: &Namespace,
    req: ListQueuesRequest,
) -> Result<ListQueuesResponse, CqsError> {
    let max = req.max_results.unwrap_or(1000).clamp(1, 1000) as usize;
    let mut urls = ns.list_queues(req.queue_name_prefix.as_deref()).await;
    urls.truncate(max);
    Ok(ListQueuesResponse {
        queue_urls: (!urls.is_empty()).then_some(urls),
    })
}

async fn get_queue_attributes(
    ns: &Namespace,
    req: GetQueueAttributesRequest,
) -> Result<GetQueueAttributesResponse, CqsError> {
    let names = req.attribute_names.unwrap_or_default();
    let attributes = ns
        .get_queue_attributes(&queue_url(&req.queue_url), &names)
        .await?;
    Ok(GetQueueAttributesResponse { attributes })
}

async fn set_queue_attributes(
    ns: &Namespace,
    req: SetQueueAttributesRequest,
) -> Result<(), CqsError> {
    Ok(ns
        .set_queue_attributes(&queue_url(&req.queue_url), &req.attributes)
        .await?)
}

async fn purge_queue(ns: &Namespace, req: QueueUrlRequest) -> Result<(), CqsError> {
    Ok(ns.purge_queue(&queue_url(&req.queue_url)).await?)
}

async fn send_message(
    ns: &Namespace,
    req: SendMessageRequest,
) -> Result<SendMessageResponse, CqsError> {
    let delay = seconds("DelaySeconds", req.delay_seconds)?;
    let attrs = to_message_attributes(req.message_attributes)?;
    let sent = ns
        .send_message(&queue_url(&req.queue_url), req.message_body, delay, attrs)
        .await?;
    Ok(SendMessageResponse {
        message_id: sent.message_id,
        md5_of_message_body: sent.md5_of_body,
        md5_of_message_attributes: sent.md5_of_message_attributes,
    })
}

async fn send_message_batch(
    ns: &Namespace,
    req: SendMessageBatchRequest,
) -> Result<SendMessageBatchResponse, CqsError> {
    validate_batch_ids(req.entries.iter().map(|e| e.id.as_str()))?;
    let url = queue_url(&req.queue_url);
    let mut successful = Vec::new();
    let mut failed = Vec::new();

    for entry in req.entries {
        let sent = match (
            seconds("DelaySeconds", entry.delay_seconds),
            to_message_attributes(entry.message_attributes),
        ) {
            (Ok(delay), Ok(attrs)) => {
                ns.send_message(&url, entry.message_body, delay, attrs)
                    .await
            }
            (Err(e), _) => Err(BrokerError::invalid(e.message())),
            (_, Err(e)) => Err(e),
        };
        match sent {
            Ok(sent) => successful.push(SendMessageBatchResultEntry {
                id: entry.id,
                message_id: sent.message_id,
                md5_of_message_body: sent.md5_of_body,
                md5_of_message_attributes: sent.md5_of_message_attributes,
            }),
            Err(err) => failed.push(batch_failure(entry.id, err)?),
        }
    }

    Ok(SendMessageBatchResponse { successful, failed })
}

async fn receive_message(
    ns: &Namespace,
    req: ReceiveMessageRequest,
) -> Result<ReceiveMessageResponse, CqsError> {
    let max = match req.max_number_of_messages {
        Some(n) if !(1..=MAX_RECEIVE_BATCH as i32).contains(&n) => {
            return Err(CqsError::InvalidParameterValue(format!(
                "Value {n} for parameter MaxNumberOfMessages is invalid. Reason: Must be between 1 and {MAX_RECEIVE_BATCH}, if provided."
            )))
        }
        Some(n) => Some(n as usize),
        None => None,
    };
    let mut attribute_names = req.attribute_names.unwrap_or_default();
    attribute_names.extend(req.message_system_attribute_names.unwrap_or_default());

    let opts = ReceiveOptions {
        max_messages: max,
        wait_time_seconds: seconds("WaitTimeSeconds", req.wait_time_seconds)?,
        visibility_timeout: seconds("VisibilityTimeout", req.visibility_timeout)?,
        attribute_names,
        message_attribute_names: req.message_attribute_names.unwrap_or_default(),
    };
    let received = ns
        .receive_messages(&queue_url(&req.queue_url), opts)
        .await?;
    let messages: Vec<ReceiveMessageResult> = received.into_iter().map(Into::into).collect();
    Ok(ReceiveMessageResponse {
        messages: (!messages.is_empty()).then_some(messages),
    })
}

async fn delete_message(ns: &Namespace, req: DeleteMessageRequest) -> Result<(), CqsError> {
    Ok(ns
        .delete_message(&queue_url(&req.queue_url), &req.receipt_handle)
        .await?)
}

async fn delete_message_batch(
    ns: &Namespace,
    req: DeleteMessageBatchRequest,
) -> Result<DeleteMessageBatchResponse, CqsError> {
    validate_batch_ids(req.entries.iter().map(|e| e.id.as_str()))?;
    let url = queue_url(&req.queue_url);
    let mut successful = Vec::new();
    let mut failed = Vec::new();

    for entry in req.entries {
        match ns.delete_message(&url, &entry.receipt_handle).await {
            Ok(()) => successful.push(BatchResultEntry { id: entry.id }),
            Err(err) => failed.push(batch_failure(entry.id, err)?),
        }
    }

    Ok(DeleteMessageBatchResponse { successful, failed })
}

async fn change_message_visibility(
    ns: &Namespace,
    req: ChangeMessageVisibilityRequest,
) -> Result<(), CqsError> {
    let timeout = seconds("VisibilityTimeout", Some(req.visibility_timeout))?.unwrap_or_default();
    Ok(ns
        .change_message_visibility(&queue_url(&req.queue_url), &req.receipt_handle, timeout)
        .await?)
}

async fn change_message_visibility_batch(
    ns: &Namespace,
    req: ChangeMessageVisibilityBatchRequest,
) -> Result<ChangeMessageVisibilityBatchResponse, CqsError> {
    validate_batch_ids(req.entries.iter().map(|e| e.id.as_str()))?;
    let url = queue_url(&req.queue_url);
    let mut successful = Vec::new();
    let mut failed = Vec::new();

    for entry in req.entries {
        let changed = match seconds("VisibilityTimeout", Some(entry.visibility_timeout)) {
            Ok(timeout) => {
                ns.change_message_visibility(&url, &entry.receipt_handle, timeout.unwrap_or_default())
                    .await
            }
            Err(e) => Err(BrokerError::invalid(e.message())),
        };
        match changed {
            Ok(()) => successful.push(BatchResultEntry { id: entry.id }),
            Err(err) => failed.push(batch_failure(entry.id, err)?),
        }
    }

    Ok(ChangeMessageVisibilityBatchResponse { successful, failed })
}

// ── router ─────────────────────────────────────────────────────────────

pub fn create_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/", post(handle_request))
        .with_state(broker)
}
