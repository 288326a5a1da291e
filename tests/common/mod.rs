#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use tower::ServiceExt;

use cmb_local::broker::{Broker, BrokerConfig};

pub fn broker() -> Arc<Broker> {
    Arc::new(Broker::new(BrokerConfig::default()))
}

pub fn sigv4(access_key: &str, service: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/20240101/csv/{service}/aws4_request, \
         SignedHeaders=host;x-amz-date, Signature=0000"
    )
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let resp = router.clone().oneshot(request).await.expect("router call");
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    (status, String::from_utf8(bytes.to_vec()).expect("utf-8 body"))
}

/// POSTs a query-protocol request to the CNS router.
pub async fn cns(router: &Router, params: &[(&str, &str)]) -> (StatusCode, String) {
    cns_as(router, None, params).await
}

pub async fn cns_as(
    router: &Router,
    access_key: Option<&str>,
    params: &[(&str, &str)],
) -> (StatusCode, String) {
    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("content-type", "application/x-www-form-urlencoded");
    if let Some(key) = access_key {
        builder = builder.header("authorization", sigv4(key, "sns"));
    }
    send(router, builder.body(Body::from(body)).expect("request")).await
}

pub async fn cns_get(router: &Router, query: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/?{query}"))
        .body(Body::empty())
        .expect("request");
    send(router, request).await
}

/// POSTs a JSON-protocol request to the CQS router.
pub async fn cqs(router: &Router, action: &str, body: Value) -> (StatusCode, Value) {
    cqs_as(router, None, action, body).await
}

pub async fn cqs_as(
    router: &Router,
    access_key: Option<&str>,
    action: &str,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("content-type", "application/x-amz-json-1.0")
        .header("x-amz-target", format!("AmazonSQS.{action}"));
    if let Some(key) = access_key {
        builder = builder.header("authorization", sigv4(key, "sqs"));
    }
    let request = builder
        .body(Body::from(body.to_string()))
        .expect("request");
    let (status, text) = send(router, request).await;
    let value = serde_json::from_str(&text).expect("json response");
    (status, value)
}

/// Text content of every `<tag>` element in `xml`, in document order.
pub fn xml_texts(xml: &str, tag: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut out = Vec::new();
    loop {
        match reader.read_event().expect("well-formed xml") {
            Event::Start(e) => inside = e.name().as_ref() == tag.as_bytes(),
            Event::Text(t) if inside => {
                out.push(t.unescape().expect("valid escapes").into_owned());
                inside = false;
            }
            Event::End(_) => {
                if inside {
                    out.push(String::new());
                }
                inside = false;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    out
}

pub fn xml_text(xml: &str, tag: &str) -> String {
    xml_texts(xml, tag)
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no <{tag}> in {xml}"))
}
