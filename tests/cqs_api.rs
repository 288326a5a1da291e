mod common;

use axum::http::StatusCode;
use serde_json::json;

use cmb_local::cqs;
use common::cqs;

#[tokio::test]
async fn send_receive_delete_over_json_protocol() {
    let router = cqs::create_router(common::broker());

    let (status, body) = cqs(&router, "CreateQueue", json!({"QueueName": "queue-1000"})).await;
    assert_eq!(status, StatusCode::OK);
    let url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();
    assert_eq!(url, "http://localhost:6059/000000000000/queue-1000");

    let (_, body) = cqs(&router, "GetQueueUrl", json!({"QueueName": "queue-1000"})).await;
    assert_eq!(body["QueueUrl"], url.as_str());

    let (status, body) = cqs(
        &router,
        "SendMessage",
        json!({"QueueUrl": url, "MessageBody": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["MD5OfMessageBody"], "5d41402abc4b2a76b9719d911017c592");
    assert!(body.get("MD5OfMessageAttributes").is_none());

    let (_, body) = cqs(
        &router,
        "ReceiveMessage",
        json!({"QueueUrl": url, "MaxNumberOfMessages": 10, "AttributeNames": ["All"]}),
    )
    .await;
    let messages = body["Messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["Body"], "hello");
    assert_eq!(messages[0]["Attributes"]["ApproximateReceiveCount"], "1");
    let handle = messages[0]["ReceiptHandle"].as_str().expect("handle").to_string();

    let (_, body) = cqs(&router, "ReceiveMessage", json!({"QueueUrl": url})).await;
    assert!(body.get("Messages").is_none(), "leased message is invisible");

    let (status, _) = cqs(
        &router,
        "DeleteMessage",
        json!({"QueueUrl": url, "ReceiptHandle": handle}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = cqs(
        &router,
        "DeleteMessage",
        json!({"QueueUrl": url, "ReceiptHandle": handle}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "com.amazonaws.sqs#ReceiptHandleIsInvalid");
}

#[tokio::test]
async fn message_attributes_round_trip_with_digest() {
    let router = cqs::create_router(common::broker());
    let (_, body) = cqs(&router, "CreateQueue", json!({"QueueName": "typed"})).await;
    let url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();

    let (_, sent) = cqs(
        &router,
        "SendMessage",
        json!({
            "QueueUrl": url,
            "MessageBody": "with attrs",
            "MessageAttributes": {
                "color": {"DataType": "String", "StringValue": "red"},
                "blob": {"DataType": "Binary", "BinaryValue": "aGVsbG8="}
            }
        }),
    )
    .await;
    let digest = sent["MD5OfMessageAttributes"].as_str().expect("digest");

    let (_, body) = cqs(
        &router,
        "ReceiveMessage",
        json!({"QueueUrl": url, "MessageAttributeNames": ["All"]}),
    )
    .await;
    let msg = &body["Messages"][0];
    assert_eq!(msg["MD5OfMessageAttributes"], digest);
    assert_eq!(msg["MessageAttributes"]["color"]["StringValue"], "red");
    assert_eq!(msg["MessageAttributes"]["blob"]["BinaryValue"], "aGVsbG8=");
}

#[tokio::test]
async fn errors_use_sqs_type_names() {
    let router = cqs::create_router(common::broker());

    let (status, body) = cqs(
        &router,
        "SendMessage",
        json!({"QueueUrl": "http://localhost:6059/000000000000/missing", "MessageBody": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "com.amazonaws.sqs#QueueDoesNotExist");

    let (_, body) = cqs(
        &router,
        "CreateQueue",
        json!({"QueueName": "q", "Attributes": {"VisibilityTimeout": "99999"}}),
    )
    .await;
    assert_eq!(body["__type"], "com.amazonaws.sqs#InvalidParameterValue");

    cqs(&router, "CreateQueue", json!({"QueueName": "q"})).await;
    let (_, body) = cqs(
        &router,
        "CreateQueue",
        json!({"QueueName": "q", "Attributes": {"DelaySeconds": "5"}}),
    )
    .await;
    assert_eq!(body["__type"], "com.amazonaws.sqs#QueueAlreadyExists");

    let (_, body) = cqs(&router, "Frobnicate", json!({})).await;
    assert_eq!(body["__type"], "com.amazonaws.sqs#InvalidAction");
}

#[tokio::test]
async fn batch_operations_report_per_entry_results() {
    let router = cqs::create_router(common::broker());
    let (_, body) = cqs(&router, "CreateQueue", json!({"QueueName": "batch"})).await;
    let url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();

    let (status, body) = cqs(
        &router,
        "SendMessageBatch",
        json!({
            "QueueUrl": url,
            "Entries": [
                {"Id": "a", "MessageBody": "one"},
                {"Id": "b", "MessageBody": "two"},
                {"Id": "c", "MessageBody": ""}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Successful"].as_array().expect("successful").len(), 2);
    assert_eq!(body["Failed"][0]["Id"], "c");
    assert_eq!(body["Failed"][0]["SenderFault"], true);

    let (_, body) = cqs(
        &router,
        "ReceiveMessage",
        json!({"QueueUrl": url, "MaxNumberOfMessages": 10}),
    )
    .await;
    let entries: Vec<_> = body["Messages"]
        .as_array()
        .expect("messages")
        .iter()
        .enumerate()
        .map(|(i, m)| json!({"Id": format!("m{i}"), "ReceiptHandle": m["ReceiptHandle"]}))
        .chain([json!({"Id": "stale", "ReceiptHandle": "nope"})])
        .collect();
    let (_, body) = cqs(
        &router,
        "DeleteMessageBatch",
        json!({"QueueUrl": url, "Entries": entries}),
    )
    .await;
    assert_eq!(body["Successful"].as_array().expect("successful").len(), 2);
    assert_eq!(body["Failed"][0]["Code"], "ReceiptHandleIsInvalid");

    let (status, body) = cqs(
        &router,
        "DeleteMessageBatch",
        json!({"QueueUrl": url, "Entries": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "com.amazonaws.sqs#EmptyBatchRequest");
}

#[tokio::test]
async fn queue_administration() {
    let router = cqs::create_router(common::broker());
    for name in ["alpha", "beta", "alphabet"] {
        cqs(&router, "CreateQueue", json!({"QueueName": name})).await;
    }
    let (_, body) = cqs(&router, "ListQueues", json!({"QueueNamePrefix": "alpha"})).await;
    assert_eq!(body["QueueUrls"].as_array().expect("urls").len(), 2);

    let (_, body) = cqs(&router, "GetQueueUrl", json!({"QueueName": "beta"})).await;
    let url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();

    let (status, _) = cqs(
        &router,
        "SetQueueAttributes",
        json!({"QueueUrl": url, "Attributes": {"VisibilityTimeout": "45"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = cqs(
        &router,
        "GetQueueAttributes",
        json!({"QueueUrl": url, "AttributeNames": ["VisibilityTimeout", "QueueArn"]}),
    )
    .await;
    assert_eq!(body["Attributes"]["VisibilityTimeout"], "45");
    assert_eq!(body["Attributes"]["QueueArn"], "arn:cmb:cqs:csv:000000000000:beta");

    cqs(&router, "SendMessage", json!({"QueueUrl": url, "MessageBody": "x"})).await;
    cqs(&router, "PurgeQueue", json!({"QueueUrl": url})).await;
    let (_, body) = cqs(
        &router,
        "GetQueueAttributes",
        json!({"QueueUrl": url, "AttributeNames": ["ApproximateNumberOfMessages"]}),
    )
    .await;
    assert_eq!(body["Attributes"]["ApproximateNumberOfMessages"], "0");

    let (status, _) = cqs(&router, "DeleteQueue", json!({"QueueUrl": url})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = cqs(&router, "GetQueueUrl", json!({"QueueName": "beta"})).await;
    assert_eq!(body["__type"], "com.amazonaws.sqs#QueueDoesNotExist");
}

#[tokio::test]
async fn change_visibility_releases_message() {
    let router = cqs::create_router(common::broker());
    let (_, body) = cqs(&router, "CreateQueue", json!({"QueueName": "cv"})).await;
    let url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();
    cqs(&router, "SendMessage", json!({"QueueUrl": url, "MessageBody": "m"})).await;

    let (_, body) = cqs(&router, "ReceiveMessage", json!({"QueueUrl": url})).await;
    let handle = body["Messages"][0]["ReceiptHandle"].clone();
    let (status, _) = cqs(
        &router,
        "ChangeMessageVisibility",
        json!({"QueueUrl": url, "ReceiptHandle": handle, "VisibilityTimeout": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = cqs(&router, "ReceiveMessage", json!({"QueueUrl": url})).await;
    assert_eq!(body["Messages"][0]["Body"], "m");
}

#[tokio::test]
async fn change_visibility_batch_reports_per_entry_results() {
    let router = cqs::create_router(common::broker());
    let (_, body) = cqs(&router, "CreateQueue", json!({"QueueName": "cvb"})).await;
    let url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();
    for text in ["first", "second"] {
        cqs(&router, "SendMessage", json!({"QueueUrl": url, "MessageBody": text})).await;
    }
    let (_, body) = cqs(
        &router,
        "ReceiveMessage",
        json!({"QueueUrl": url, "MaxNumberOfMessages": 10}),
    )
    .await;
    let messages = body["Messages"].as_array().expect("messages").clone();
    assert_eq!(messages.len(), 2);

    let (status, body) = cqs(
        &router,
        "ChangeMessageVisibilityBatch",
        json!({
            "QueueUrl": url,
            "Entries": [
                {"Id": "release", "ReceiptHandle": messages[0]["ReceiptHandle"], "VisibilityTimeout": 0},
                {"Id": "stale", "ReceiptHandle": "nope", "VisibilityTimeout": 0},
                {"Id": "too-long", "ReceiptHandle": messages[1]["ReceiptHandle"], "VisibilityTimeout": 99999}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Successful"], json!([{"Id": "release"}]));
    let failed = body["Failed"].as_array().expect("failed");
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0]["Id"], "stale");
    assert_eq!(failed[0]["Code"], "ReceiptHandleIsInvalid");
    assert_eq!(failed[1]["Id"], "too-long");
    assert_eq!(failed[1]["Code"], "InvalidParameterValue");

    let (_, body) = cqs(
        &router,
        "ReceiveMessage",
        json!({"QueueUrl": url, "MaxNumberOfMessages": 10}),
    )
    .await;
    let again = body["Messages"].as_array().expect("released message");
    assert_eq!(again.len(), 1);
    assert_eq!(again[0]["Body"], messages[0]["Body"]);

    let (status, body) = cqs(
        &router,
        "ChangeMessageVisibilityBatch",
        json!({"QueueUrl": url, "Entries": [
            {"Id": "dup", "ReceiptHandle": "a", "VisibilityTimeout": 0},
            {"Id": "dup", "ReceiptHandle": "b", "VisibilityTimeout": 0}
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["__type"], "com.amazonaws.sqs#BatchEntryIdsNotDistinct");
}
