use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Access key id from a SigV4 `Authorization` header
/// (`AWS4-HMAC-SHA256 Credential=AKID/date/region/service/aws4_request, ...`).
/// The signature itself is never checked.
pub fn access_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (_, credential) = value.split_once("Credential=")?;
    let key = credential
        .split(['/', ',', ' '])
        .next()
        .filter(|k| !k.is_empty())?;
    Some(key.to_string())
}
