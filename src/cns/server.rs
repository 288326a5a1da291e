use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use quick_xml::escape::escape;
use uuid::Uuid;

use super::error::CnsError;
use crate::broker::{
    Broker, MessageAttribute, MessageAttributes, Namespace, PublishRequest, SubscriptionSummary,
};
use crate::credentials;

const NS: &str = "http://sns.amazonaws.com/doc/2010-03-31/";
const LIST_PAGE_SIZE: usize = 100;

// ── form parsing helpers ───────────────────────────────────────────────

type Params = HashMap<String, String>;

fn parse_form(body: &str) -> Params {
    form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

fn param(params: &Params, key: &str) -> Option<String> {
    params.get(key).cloned()
}

fn require(params: &Params, key: &str) -> Result<String, CnsError> {
    param(params, key)
        .ok_or_else(|| CnsError::InvalidParameter(format!("Missing required parameter: {key}")))
}

/// Parse AWS query nested map: `Prefix.entry.N.key` / `Prefix.entry.N.value`
fn parse_attributes(params: &Params, prefix: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for i in 1.. {
        let k = format!("{prefix}.entry.{i}.key");
        let v = format!("{prefix}.entry.{i}.value");
        match (params.get(&k), params.get(&v)) {
            (Some(key), Some(val)) => {
                map.insert(key.clone(), val.clone());
            }
            _ => break,
        }
    }
    map
}

/// Parse `MessageAttributes.entry.N.Name` with its `.Value.DataType`,
/// `.Value.StringValue` and `.Value.BinaryValue` siblings.
fn parse_message_attributes(params: &Params) -> Result<MessageAttributes, CnsError> {
    let mut attrs = MessageAttributes::new();
    for i in 1.. {
        let prefix = format!("MessageAttributes.entry.{i}");
        let Some(name) = params.get(&format!("{prefix}.Name")) else {
            break;
        };
        let data_type = params
            .get(&format!("{prefix}.Value.DataType"))
            .ok_or_else(|| {
                CnsError::InvalidParameter(format!(
                    "The message attribute '{name}' must contain a non-empty data type"
                ))
            })?;
        let attr = MessageAttribute::from_parts(
            data_type,
            params.get(&format!("{prefix}.Value.StringValue")).map(String::as_str),
            params.get(&format!("{prefix}.Value.BinaryValue")).map(String::as_str),
        )?;
        attrs.insert(name.clone(), attr);
    }
    Ok(attrs)
}

/// One page of arn-sorted `items` starting after `next_token`, and the token
/// for the page after it.
fn page<T>(
    items: Vec<T>,
    next_token: Option<&str>,
    arn: impl Fn(&T) -> &str,
) -> (Vec<T>, Option<String>) {
    let start = match next_token.filter(|t| !t.is_empty()) {
        Some(token) => items
            .iter()
            .position(|item| arn(item) > token)
            .unwrap_or(items.len()),
        None => 0,
    };
    let mut rest: Vec<T> = items.into_iter().skip(start).collect();
    if rest.len() <= LIST_PAGE_SIZE {
        return (rest, None);
    }
    rest.truncate(LIST_PAGE_SIZE);
    let next = rest.last().map(|item| arn(item).to_string());
    (rest, next)
}

// ── XML response helpers ───────────────────────────────────────────────

fn xml_escape(s: &str) -> Cow<'_, str> {
    escape(s)
}

fn xml_ok(action: &str, result_body: &str) -> Response {
    let xml = format!(
        r#"<{action}Response xmlns="{NS}">
  <{action}Result>
{result_body}
  </{action}Result>
  <ResponseMetadata>
    <RequestId>{rid}</RequestId>
  </ResponseMetadata>
</{action}Response>"#,
        rid = Uuid::new_v4(),
    );
    (
        axum::http::StatusCode::OK,
        [("content-type", "text/xml")],
        xml,
    )
        .into_response()
}

fn xml_empty(action: &str) -> Response {
    let xml = format!(
        r#"<{action}Response xmlns="{NS}">
  <ResponseMetadata>
    <RequestId>{rid}</RequestId>
  </ResponseMetadata>
</{action}Response>"#,
        rid = Uuid::new_v4(),
    );
    (
        axum::http::StatusCode::OK,
        [("content-type", "text/xml")],
        xml,
    )
        .into_response()
}

fn attributes_xml(attrs: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();
    let mut xml = String::from("    <Attributes>\n");
    for key in keys {
        xml.push_str(&format!(
            "      <entry><key>{}</key><value>{}</value></entry>\n",
            xml_escape(key),
            xml_escape(&attrs[key]),
        ));
    }
    xml.push_str("    </Attributes>");
    xml
}

fn next_token_xml(next_token: Option<String>) -> String {
    next_token
        .map(|t| format!("\n    <NextToken>{}</NextToken>", xml_escape(&t)))
        .unwrap_or_default()
}

fn subscriptions_xml(subs: &[SubscriptionSummary]) -> String {
    let mut body = String::from("    <Subscriptions>\n");
    for s in subs {
        body.push_str(&format!(
            "      <member>\n        <TopicArn>{}</TopicArn>\n        <Protocol>{}</Protocol>\n        <SubscriptionArn>{}</SubscriptionArn>\n        <Owner>{}</Owner>\n        <Endpoint>{}</Endpoint>\n      </member>\n",
            xml_escape(&s.topic_arn),
            xml_escape(&s.protocol),
            xml_escape(&s.arn),
            xml_escape(&s.owner),
            xml_escape(&s.endpoint),
        ));
    }
    body.push_str("    </Subscriptions>");
    body
}

// ── dispatch ───────────────────────────────────────────────────────────

async fn handle_post(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, CnsError> {
    dispatch(&broker, &headers, parse_form(&body)).await
}

/// Query-string form of the same API; the `UnsubscribeURL` carried by
/// notifications points here.
async fn handle_get(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, CnsError> {
    dispatch(&broker, &headers, parse_form(query.as_deref().unwrap_or_default())).await
}

async fn dispatch(broker: &Broker, headers: &HeaderMap, params: Params) -> Result<Response, CnsError> {
    let action = param(&params, "Action")
        .ok_or_else(|| CnsError::InvalidAction("Missing Action parameter".into()))?;
    let access_key = credentials::access_key(headers)
        .or_else(|| param(&params, "AWSAccessKeyId"))
        .unwrap_or_default();
    let ns = broker.namespace(&access_key).await;
    tracing::debug!(action = %action, account_id = ns.account_id(), "cns request");

    match action.as_str() {
        "CreateTopic" => handle_create_topic(ns, params).await,
        "DeleteTopic" => handle_delete_topic(ns, params).await,
        "ListTopics" => handle_list_topics(ns, params).await,
        "GetTopicAttributes" => handle_get_topic_attributes(ns, params).await,
        "SetTopicAttributes" => handle_set_topic_attributes(ns, params).await,
        "Subscribe" => handle_subscribe(ns, params).await,
        "Unsubscribe" => handle_unsubscribe(ns, params).await,
        "ListSubscriptions" => handle_list_subscriptions(ns, params).await,
        "ListSubscriptionsByTopic" => handle_list_subscriptions_by_topic(ns, params).await,
        "GetSubscriptionAttributes" => {
            handle_get_subscription_attributes(ns, params).await
        }
        "SetSubscriptionAttributes" => {
            handle_set_subscription_attributes(ns, params).await
        }
        "Publish" => handle_publish(ns, params).await,
        _ => Err(CnsError::InvalidAction(format!(
            "Unknown action: {action}"
        ))),
    }
}

// ── action handlers ────────────────────────────────────────────────────

async fn handle_create_topic(ns: Arc<Namespace>, params: Params) -> Result<Response, CnsError> {
    let name = require(&params, "Name")?;
    let attributes = parse_attributes(&params, "Attributes");
    let arn = ns.create_topic_with_attributes(&name, &attributes).await?;
    Ok(xml_ok(
        "CreateTopic",
        &format!("    <TopicArn>{}</TopicArn>", xml_escape(&arn)),
    ))
}

async fn handle_delete_topic(ns: Arc<Namespace>, params: Params) -> Result<Response, CnsError> {
    let topic_arn = require(&params, "TopicArn")?;
    ns.delete_topic(&topic_arn).await?;
    Ok(xml_empty("DeleteTopic"))
}

async fn handle_list_topics(ns: Arc<Namespace>, params: Params) -> Result<Response, CnsError> {
    let token = param(&params, "NextToken");
    let (topics, next) = page(ns.list_topics().await, token.as_deref(), |t| t.arn.as_str());
    let mut body = String::from("    <Topics>\n");
    for t in topics {
        body.push_str(&format!(
            "      <member><TopicArn>{}</TopicArn></member>\n",
            xml_escape(&t.arn)
        ));
    }
    body.push_str("    </Topics>");
    body.push_str(&next_token_xml(next));
    Ok(xml_ok("ListTopics", &body))
}

async fn handle_get_topic_attributes(
    ns: Arc<Namespace>,
    params: Params,
) -> Result<Response, CnsError> {
    let topic_arn = require(&params, "TopicArn")?;
    let attrs = ns.get_topic_attributes(&topic_arn).await?;
    Ok(xml_ok("GetTopicAttributes", &attributes_xml(&attrs)))
}

async fn handle_set_topic_attributes(
    ns: Arc<Namespace>,
    params: Params,
) -> Result<Response, CnsError> {
    let topic_arn = require(&params, "TopicArn")?;
    let name = require(&params, "AttributeName")?;
    let value = param(&params, "AttributeValue").unwrap_or_default();
    ns.set_topic_attributes(&topic_arn, &name, value).await?;
    Ok(xml_empty("SetTopicAttributes"))
}

async fn handle_subscribe(ns: Arc<Namespace>, params: Params) -> Result<Response, CnsError> {
    let topic_arn = require(&params, "TopicArn")?;
    let protocol = require(&params, "Protocol")?;
    let endpoint = require(&params, "Endpoint")?;
    let attributes = parse_attributes(&params, "Attributes");
    let arn = ns
        .subscribe(&topic_arn, &protocol, &endpoint, &attributes)
        .await?;
    Ok(xml_ok(
        "Subscribe",
        &format!(
            "    <SubscriptionArn>{}</SubscriptionArn>",
            xml_escape(&arn)
        ),
    ))
}

async fn handle_unsubscribe(ns: Arc<Namespace>, params: Params) -> Result<Response, CnsError> {
    let subscription_arn = require(&params, "SubscriptionArn")?;
    ns.unsubscribe(&subscription_arn).await?;
    Ok(xml_empty("Unsubscribe"))
}

async fn handle_list_subscriptions(
    ns: Arc<Namespace>,
    params: Params,
) -> Result<Response, CnsError> {
    let token = param(&params, "NextToken");
    let (subs, next) = page(ns.list_subscriptions().await, token.as_deref(), |s| s.arn.as_str());
    let body = subscriptions_xml(&subs) + &next_token_xml(next);
    Ok(xml_ok("ListSubscriptions", &body))
}

async fn handle_list_subscriptions_by_topic(
    ns: Arc<Namespace>,
    params: Params,
) -> Result<Response, CnsError> {
    let topic_arn = require(&params, "TopicArn")?;
    let token = param(&params, "NextToken");
    let (subs, next) = page(
        ns.list_subscriptions_by_topic(&topic_arn).await?,
        token.as_deref(),
        |s| s.arn.as_str(),
    );
    let body = subscriptions_xml(&subs) + &next_token_xml(next);
    Ok(xml_ok("ListSubscriptionsByTopic", &body))
}

async fn handle_get_subscription_attributes(
    ns: Arc<Namespace>,
    params: Params,
) -> Result<Response, CnsError> {
    let subscription_arn = require(&params, "SubscriptionArn")?;
    let attrs = ns.get_subscription_attributes(&subscription_arn).await?;
    Ok(xml_ok("GetSubscriptionAttributes", &attributes_xml(&attrs)))
}

async fn handle_set_subscription_attributes(
    ns: Arc<Namespace>,
    params: Params,
) -> Result<Response, CnsError> {
    let subscription_arn = require(&params, "SubscriptionArn")?;
    let name = require(&params, "AttributeName")?;
    let value = param(&params, "AttributeValue").unwrap_or_default();
    ns.set_subscription_attributes(&subscription_arn, &name, &value)
        .await?;
    Ok(xml_empty("SetSubscriptionAttributes"))
}

async fn handle_publish(ns: Arc<Namespace>, params: Params) -> Result<Response, CnsError> {
    let topic_arn = param(&params, "TopicArn")
        .or_else(|| param(&params, "TargetArn"))
        .ok_or_else(|| CnsError::InvalidParameter("TopicArn is required".into()))?;
    let req = PublishRequest {
        topic_arn,
        message: require(&params, "Message")?,
        subject: param(&params, "Subject"),
        message_structure: param(&params, "MessageStructure"),
        message_attributes: parse_message_attributes(&params)?,
    };
    let outcome = ns.publish(req).await?;
    Ok(xml_ok(
        "Publish",
        &format!(
            "    <MessageId>{}</MessageId>",
            xml_escape(&outcome.message_id)
        ),
    ))
}

// ── router ─────────────────────────────────────────────────────────────

pub fn create_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/", post(handle_post).get(handle_get))
        .with_state(broker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arns(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("arn:cmb:cns:csv:000000000000:t{i:03}")).collect()
    }

    #[test]
    fn pages_follow_the_previous_token() {
        let (first, token) = page(arns(205), None, |a| a.as_str());
        assert_eq!(first.len(), LIST_PAGE_SIZE);
        assert_eq!(token.as_deref(), Some(first[99].as_str()));

        let (second, token) = page(arns(205), token.as_deref(), |a| a.as_str());
        assert_eq!(second[0], "arn:cmb:cns:csv:000000000000:t100");
        let (last, token) = page(arns(205), token.as_deref(), |a| a.as_str());
        assert_eq!(last.len(), 5);
        assert_eq!(token, None);
    }

    #[test]
    fn short_lists_have_no_token() {
        let (all, token) = page(arns(100), None, |a| a.as_str());
        assert_eq!(all.len(), 100);
        assert_eq!(token, None);
        let (all, _) = page(arns(3), Some(""), |a| a.as_str());
        assert_eq!(all.len(), 3);
    }
}
