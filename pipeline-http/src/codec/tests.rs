//! Tests for the JSON array batch protocol.

use bytes::Bytes;
use reqwest::{header::HeaderMap, Method, Url};
use serde_json::{json, Value};

use tower_batch_endpoint::{BatchItem, BatchResponse, EndpointKey, RequestId};

use crate::{BatchCodec, HttpError, HttpRequest, HttpResponse, JsonArrayCodec};

const ENDPOINT: &str = "http://adapter.test/price";

fn item(symbol: &str, headers: &[&str]) -> BatchItem<HttpRequest> {
    let url: Url = ENDPOINT.parse().expect("test URL is valid");
    let body = json!({ "symbol": symbol })
        .as_object()
        .cloned()
        .expect("literal is an object");

    BatchItem {
        id: RequestId::new(),
        request: HttpRequest::post(url, body).with_headers(headers.iter().copied()),
    }
}

fn physical(body: Value) -> HttpResponse {
    HttpResponse::new(200, HeaderMap::new(), Bytes::from(body.to_string()))
}

fn json_body(response: &HttpResponse) -> Value {
    serde_json::from_slice(&response.body).expect("split bodies are JSON")
}

#[test]
fn encodes_one_post_with_every_body_in_order() {
    let _init_guard = pipeline_test::init();

    let items = vec![
        item("ETH", &["X-Api-Key", "secret"]),
        item("BTC", &["x-api-key", "secret"]),
    ];
    let endpoint = items[0].request.endpoint();

    let request = JsonArrayCodec
        .encode(&endpoint, &items)
        .expect("batch encodes");

    assert_eq!(request.method, Method::POST);
    assert_eq!(request.url.as_str(), ENDPOINT);
    assert_eq!(request.headers, vec!["X-Api-Key", "secret"]);

    let body = Value::Object(request.body.expect("batch has a body"));
    assert_eq!(
        body,
        json!({
            "requests": [
                { "id": items[0].id.to_string(), "data": { "symbol": "ETH" } },
                { "id": items[1].id.to_string(), "data": { "symbol": "BTC" } },
            ]
        })
    );
}

#[test]
fn requests_with_different_headers_are_not_encoded_together() {
    let _init_guard = pipeline_test::init();

    let items = vec![
        item("ETH", &["X-Api-Key", "first"]),
        item("BTC", &["X-Api-Key", "second"]),
    ];

    assert_ne!(items[0].request.endpoint(), items[1].request.endpoint());
    assert!(JsonArrayCodec
        .encode(&items[0].request.endpoint(), &items)
        .is_err());
}

#[test]
fn error_urls_leave_out_the_header_fingerprint() {
    let _init_guard = pipeline_test::init();

    let endpoint = item("ETH", &["X-Api-Key", "secret"]).request.endpoint();
    let ids = [RequestId::new()];
    let response = physical(json!({ "responses": [{ "statusCode": 500, "error": "boom" }] }));

    let decoded = JsonArrayCodec
        .decode(&endpoint, response, &ids)
        .expect("valid batch response");

    let BatchResponse::Positional(responses) = decoded else {
        panic!("entries without ids must be matched by position");
    };

    assert!(matches!(
        &responses[0].error,
        Some(HttpError::Status { url, .. }) if url == ENDPOINT
    ));
}

#[test]
fn empty_batches_are_not_encoded() {
    let _init_guard = pipeline_test::init();

    assert!(JsonArrayCodec.encode(ENDPOINT, &[]).is_err());
}

#[test]
fn decodes_entries_by_id() {
    let _init_guard = pipeline_test::init();

    let ids = [RequestId::new(), RequestId::new()];
    let response = physical(json!({
        "responses": [
            { "id": ids[1].to_string(), "data": { "result": 2 } },
            { "id": ids[0].to_string(), "statusCode": 502, "error": "upstream down" },
        ]
    }));

    let decoded = JsonArrayCodec
        .decode(ENDPOINT, response, &ids)
        .expect("valid batch response");

    let BatchResponse::ById(responses) = decoded else {
        panic!("entries with ids must be matched by id");
    };

    let second = &responses[&ids[1]];
    assert!(second.is_success());
    assert_eq!(json_body(second), json!({ "result": 2 }));

    let first = &responses[&ids[0]];
    assert_eq!(first.status, 502);
    assert!(matches!(
        &first.error,
        Some(HttpError::Status { message, status: 502, .. }) if message == "upstream down"
    ));
}

#[test]
fn decodes_entries_without_ids_in_order() {
    let _init_guard = pipeline_test::init();

    let ids = [RequestId::new(), RequestId::new()];
    let response = physical(json!({
        "responses": [
            { "data": "first" },
            { "statusCode": 404, "data": { "errorMessage": "unknown symbol" } },
        ]
    }));

    let decoded = JsonArrayCodec
        .decode(ENDPOINT, response, &ids)
        .expect("valid batch response");

    let BatchResponse::Positional(responses) = decoded else {
        panic!("entries without ids must be matched by position");
    };

    assert_eq!(responses.len(), 2);
    assert_eq!(json_body(&responses[0]), json!("first"));
    assert!(matches!(
        &responses[1].error,
        Some(HttpError::Status { message, status: 404, .. }) if message == "unknown symbol"
    ));
}

#[test]
fn rejects_malformed_batch_responses() {
    let _init_guard = pipeline_test::init();

    let ids = [RequestId::new(), RequestId::new()];

    let mixed = physical(json!({
        "responses": [
            { "id": ids[0].to_string(), "data": 1 },
            { "data": 2 },
        ]
    }));
    assert!(JsonArrayCodec.decode(ENDPOINT, mixed, &ids).is_err());

    let bad_id = physical(json!({ "responses": [{ "id": "not-a-uuid", "data": 1 }] }));
    assert!(JsonArrayCodec.decode(ENDPOINT, bad_id, &ids).is_err());

    let not_a_batch = physical(json!({ "result": 1 }));
    assert!(JsonArrayCodec.decode(ENDPOINT, not_a_batch, &ids).is_err());
}
