mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use cmb_local::{cns, cqs};
use common::{cns_as, cqs_as, xml_text, xml_texts};

#[tokio::test]
async fn publish_to_topic_lands_in_subscribed_queue() {
    let broker = common::broker();
    let cns = cns::create_router(broker.clone());
    let cqs = cqs::create_router(broker);

    let (_, body) = common::cns(&cns, &[("Action", "CreateTopic"), ("Name", "topic-1000")]).await;
    let topic = xml_text(&body, "TopicArn");

    let (_, body) = common::cqs(&cqs, "CreateQueue", json!({"QueueName": "queue-1000"})).await;
    let url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();
    let (_, body) = common::cqs(
        &cqs,
        "GetQueueAttributes",
        json!({"QueueUrl": url, "AttributeNames": ["QueueArn"]}),
    )
    .await;
    let queue_arn = body["Attributes"]["QueueArn"]
        .as_str()
        .expect("QueueArn")
        .to_string();

    let (status, body) = common::cns(
        &cns,
        &[
            ("Action", "Subscribe"),
            ("TopicArn", &topic),
            ("Protocol", "cqs"),
            ("Endpoint", &queue_arn),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let subscription = xml_text(&body, "SubscriptionArn");

    let (status, body) = common::cns(
        &cns,
        &[
            ("Action", "Publish"),
            ("TopicArn", &topic),
            ("Message", "hello world"),
            ("Subject", "greeting"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let message_id = xml_text(&body, "MessageId");

    let (_, body) = common::cqs(
        &cqs,
        "ReceiveMessage",
        json!({"QueueUrl": url, "MaxNumberOfMessages": 10, "WaitTimeSeconds": 1}),
    )
    .await;
    let messages = body["Messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 1, "delivered exactly once");

    let envelope: Value =
        serde_json::from_str(messages[0]["Body"].as_str().expect("body")).expect("envelope json");
    assert_eq!(envelope["Type"], "Notification");
    assert_eq!(envelope["Message"], "hello world");
    assert_eq!(envelope["Subject"], "greeting");
    assert_eq!(envelope["TopicArn"], topic.as_str());
    assert_eq!(envelope["MessageId"], message_id.as_str());
    let unsubscribe = envelope["UnsubscribeURL"].as_str().expect("unsubscribe url");
    let query = unsubscribe
        .strip_prefix("http://localhost:6061/?")
        .expect("link targets the cns endpoint");
    let params: std::collections::HashMap<String, String> =
        form_urlencoded::parse(query.as_bytes()).into_owned().collect();
    assert_eq!(params["Action"], "Unsubscribe");
    assert_eq!(params["SubscriptionArn"], subscription);

    let handle = messages[0]["ReceiptHandle"].clone();
    let (status, _) = common::cqs(
        &cqs,
        "DeleteMessage",
        json!({"QueueUrl": url, "ReceiptHandle": handle}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = common::cqs(
        &cqs,
        "DeleteMessage",
        json!({"QueueUrl": url, "ReceiptHandle": handle}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn long_poll_is_woken_by_publish() {
    let broker = common::broker();
    let cns = cns::create_router(broker.clone());
    let cqs = cqs::create_router(broker.clone());

    let ns = broker.namespace("").await;
    let topic = ns.create_topic("wakeup").await.expect("topic");
    let url = ns
        .create_queue("wakeup-q", &Default::default())
        .await
        .expect("queue");
    ns.subscribe(
        &topic,
        "cqs",
        &url,
        &[("RawMessageDelivery".to_string(), "true".to_string())]
            .into_iter()
            .collect(),
    )
    .await
    .expect("subscribe");

    let poller = {
        let cqs = cqs.clone();
        let url = url.clone();
        tokio::spawn(async move {
            common::cqs(
                &cqs,
                "ReceiveMessage",
                json!({"QueueUrl": url, "WaitTimeSeconds": 10}),
            )
            .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    common::cns(
        &cns,
        &[("Action", "Publish"), ("TopicArn", &topic), ("Message", "ping")],
    )
    .await;

    let (status, body) = poller.await.expect("poller task");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Messages"][0]["Body"], "ping");
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn access_keys_select_isolated_namespaces() {
    let broker = common::broker();
    let cns = cns::create_router(broker.clone());
    let cqs = cqs::create_router(broker);

    let (status, body) = cqs_as(&cqs, Some("alice"), "CreateQueue", json!({"QueueName": "shared"})).await;
    assert_eq!(status, StatusCode::OK);
    let alice_url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();
    assert!(!alice_url.contains("/000000000000/"));

    let (_, body) = cqs_as(&cqs, Some("bob"), "GetQueueUrl", json!({"QueueName": "shared"})).await;
    assert_eq!(body["__type"], "com.amazonaws.sqs#QueueDoesNotExist");

    // Unsigned requests land in the configured key's account.
    let (_, body) = cqs_as(&cqs, Some("test"), "CreateQueue", json!({"QueueName": "shared"})).await;
    let default_url = body["QueueUrl"].as_str().expect("QueueUrl").to_string();
    let (_, body) = common::cqs(&cqs, "GetQueueUrl", json!({"QueueName": "shared"})).await;
    assert_eq!(body["QueueUrl"], default_url.as_str());
    assert_ne!(default_url, alice_url);

    let (_, body) = cns_as(&cns, Some("alice"), &[("Action", "CreateTopic"), ("Name", "news")]).await;
    let alice_topic = xml_text(&body, "TopicArn");
    let (_, body) = cns_as(&cns, Some("bob"), &[("Action", "ListTopics")]).await;
    assert!(xml_texts(&body, "TopicArn").is_empty());

    let (status, _) = cns_as(
        &cns,
        Some("bob"),
        &[("Action", "Publish"), ("TopicArn", &alice_topic), ("Message", "x")],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = cns_as(
        &cns,
        None,
        &[
            ("Action", "ListTopics"),
            ("AWSAccessKeyId", "alice"),
        ],
    )
    .await;
    assert_eq!(xml_texts(&body, "TopicArn"), vec![alice_topic]);
}

#[tokio::test]
async fn unsubscribe_link_resolves_the_owning_namespace() {
    let broker = common::broker();
    let cns = cns::create_router(broker.clone());
    let alice = broker.namespace("alice").await;
    let topic = alice.create_topic("alerts").await.expect("topic");
    let url = alice
        .create_queue("alerts-q", &Default::default())
        .await
        .expect("queue");
    alice
        .subscribe(&topic, "cqs", &url, &Default::default())
        .await
        .expect("subscribe");
    alice
        .publish(cmb_local::broker::PublishRequest::new(topic, "x"))
        .await
        .expect("publish");

    let got = alice
        .receive_messages(&url, Default::default())
        .await
        .expect("receive");
    let envelope: Value = serde_json::from_str(&got[0].body).expect("envelope json");
    let link = envelope["UnsubscribeURL"].as_str().expect("unsubscribe url");
    let query = link
        .strip_prefix("http://localhost:6061/?")
        .expect("link targets the cns endpoint");

    // Followed without any signature, as a mail client or browser would.
    let (status, _) = common::cns_get(&cns, query).await;
    assert_eq!(status, StatusCode::OK);
    assert!(alice.list_subscriptions().await.is_empty());
}
