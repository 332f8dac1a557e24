//! Tests for routing requests through the batch middleware or the direct executor.

use std::time::Duration;

use color_eyre::eyre::{eyre, Result};
use reqwest::{Method, Url};
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use pipeline_http::{
    Config, HttpClient, HttpError, HttpRequest, HttpTask, JsonArrayCodec, RequestContext,
    TaskTimeout,
};
use pipeline_task::{MaxTask, TaskResult};
use pipeline_test::net::{CannedResponse, CannedServer, RecordedRequest};
use tower_batch_endpoint::error::BatchError;

fn batching_config(batch_size: usize, batch_timeout: Duration) -> Config {
    Config {
        batching_enabled: true,
        batch_size,
        batch_timeout,
        ..Config::default()
    }
}

fn symbol_request(server: &CannedServer, path: &str, symbol: &str) -> Result<HttpRequest> {
    let url: Url = server.url(path).parse()?;
    let body = json!({ "symbol": symbol })
        .as_object()
        .cloned()
        .unwrap_or_default();

    Ok(HttpRequest::post(url, body))
}

/// Returns the `requests` array of a physical batch request.
fn batch_items(request: &RecordedRequest) -> Vec<Value> {
    serde_json::from_slice::<Value>(&request.body)
        .ok()
        .and_then(|body| body.get("requests").and_then(Value::as_array).cloned())
        .unwrap_or_default()
}

/// Answers each batched request by id, in reverse order, echoing its symbol.
fn echo_by_id(request: &RecordedRequest) -> CannedResponse {
    let responses: Vec<Value> = batch_items(request)
        .into_iter()
        .rev()
        .map(|item| json!({ "id": item["id"], "data": { "echo": item["data"]["symbol"] } }))
        .collect();

    CannedResponse::ok(json!({ "responses": responses }).to_string())
}

/// Answers each batched request in order, without ids, with a per-symbol price.
fn prices_by_position(request: &RecordedRequest) -> CannedResponse {
    let responses: Vec<Value> = batch_items(request)
        .into_iter()
        .map(|item| match item["data"]["symbol"].as_str() {
            Some("ETH") => json!({ "data": 3000 }),
            Some("BTC") => json!({ "data": 60000 }),
            _ => json!({ "statusCode": 404, "error": "unknown symbol" }),
        })
        .collect();

    CannedResponse::ok(json!({ "responses": responses }).to_string())
}

fn json_body(body: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(body)?)
}

#[tokio::test]
async fn concurrent_posts_share_one_physical_request() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::start(echo_by_id).await?;
    let client = HttpClient::from_config(
        &batching_config(2, Duration::from_secs(5)),
        JsonArrayCodec,
    )?;
    let ctx = RequestContext::new();

    let eth = symbol_request(&server, "/price", "ETH")?;
    let btc = symbol_request(&server, "/price", "BTC")?;

    let start = Instant::now();
    let (eth, btc) = tokio::join!(client.send(eth, &ctx), client.send(btc, &ctx));

    // The batch was full, so it did not wait for its timer.
    assert!(start.elapsed() < Duration::from_secs(5));

    assert!(eth.is_success(), "{:?}", eth.error);
    assert!(btc.is_success(), "{:?}", btc.error);
    assert_eq!(json_body(&eth.body)?, json!({ "echo": "ETH" }));
    assert_eq!(json_body(&btc.body)?, json!({ "echo": "BTC" }));
    assert!(eth.start <= eth.finish);

    let received = server.requests();
    assert_eq!(received.len(), 1, "both requests must share one call");
    assert_eq!(received[0].method, "POST");
    assert_eq!(received[0].path, "/price");
    assert_eq!(batch_items(&received[0]).len(), 2);

    Ok(())
}

#[tokio::test]
async fn partial_batches_flush_at_the_batch_timeout() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::start(prices_by_position).await?;
    let client = HttpClient::from_config(
        &batching_config(10, Duration::from_millis(100)),
        JsonArrayCodec,
    )?;
    let ctx = RequestContext::new();

    let start = Instant::now();
    let response = client
        .send(symbol_request(&server, "/price", "ETH")?, &ctx)
        .await;

    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(response.is_success(), "{:?}", response.error);
    assert_eq!(json_body(&response.body)?, json!(3000));

    Ok(())
}

#[tokio::test]
async fn get_requests_bypass_batching() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::fixed(CannedResponse::ok(r#"{"status":"ok"}"#)).await?;
    let client = HttpClient::from_config(
        &batching_config(10, Duration::from_secs(5)),
        JsonArrayCodec,
    )?;

    let url: Url = server.url("/status").parse()?;
    let start = Instant::now();
    let response = client
        .send(HttpRequest::new(Method::GET, url), &RequestContext::new())
        .await;

    assert!(start.elapsed() < Duration::from_secs(5), "GET must not wait for a batch");
    assert!(response.is_success(), "{:?}", response.error);
    assert_eq!(server.requests()[0].method, "GET");

    Ok(())
}

#[tokio::test]
async fn disabled_batching_sends_every_request_directly() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::fixed(CannedResponse::ok("7")).await?;
    let client = HttpClient::from_config(&Config::default(), JsonArrayCodec)?;
    assert!(client.batch().is_none());

    let ctx = RequestContext::new();
    let (first, second) = tokio::join!(
        client.send(symbol_request(&server, "/price", "ETH")?, &ctx),
        client.send(symbol_request(&server, "/price", "BTC")?, &ctx),
    );

    assert!(first.is_success() && second.is_success());
    assert_eq!(server.requests().len(), 2);

    Ok(())
}

#[tokio::test]
async fn custom_predicates_choose_the_batched_requests() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::fixed(CannedResponse::ok("7")).await?;
    let client = HttpClient::from_config(
        &batching_config(10, Duration::from_secs(5)),
        JsonArrayCodec,
    )?
    .with_predicate(|request| request.url.path() == "/batched");

    let response = client
        .send(symbol_request(&server, "/direct", "ETH")?, &RequestContext::new())
        .await;

    assert!(response.is_success(), "{:?}", response.error);
    assert_eq!(&response.body[..], b"7");

    Ok(())
}

#[tokio::test]
async fn failed_physical_calls_fail_every_caller() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::fixed(CannedResponse::with_status(
        503,
        r#"{"error":"adapter overloaded"}"#,
    ))
    .await?;
    let client = HttpClient::from_config(
        &batching_config(2, Duration::from_secs(5)),
        JsonArrayCodec,
    )?;
    let ctx = RequestContext::new();

    let (eth, btc) = tokio::join!(
        client.send(symbol_request(&server, "/price", "ETH")?, &ctx),
        client.send(symbol_request(&server, "/price", "BTC")?, &ctx),
    );

    for response in [eth, btc] {
        let error = response
            .error
            .ok_or_else(|| eyre!("a failed batch must fail its callers"))?;

        assert!(matches!(error, HttpError::Batch(BatchError::Downstream(_))), "{error:?}");
        assert!(error.to_string().contains("adapter overloaded"), "{error}");
    }

    assert_eq!(server.requests().len(), 1);

    Ok(())
}

#[tokio::test]
async fn cancelled_callers_time_out_but_stay_in_the_batch() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::start(prices_by_position).await?;
    let client = HttpClient::from_config(
        &batching_config(10, Duration::from_millis(300)),
        JsonArrayCodec,
    )?;

    let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));
    let start = Instant::now();
    let response = client
        .send(symbol_request(&server, "/price", "ETH")?, &ctx)
        .await;

    assert!(matches!(response.error, Some(HttpError::TimedOut)));
    assert!(start.elapsed() < Duration::from_millis(300));

    // The abandoned request is still sent when its batch flushes.
    sleep(Duration::from_millis(600)).await;

    let received = server.requests();
    assert_eq!(received.len(), 1);
    assert_eq!(batch_items(&received[0]).len(), 1);

    Ok(())
}

#[tokio::test]
async fn http_task_faults_feed_fault_tolerant_aggregation() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::start(prices_by_position).await?;
    let config = batching_config(3, Duration::from_secs(5));
    let client = HttpClient::from_config(&config, JsonArrayCodec)?;
    let parent = RequestContext::new();

    let tasks = ["ETH", "DOGE", "BTC"]
        .into_iter()
        .map(|symbol| -> Result<HttpTask> {
            Ok(HttpTask::new(symbol_request(&server, "/price", symbol)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let (eth, doge, btc) = tokio::join!(
        tasks[0].run(&client, &parent, &config),
        tasks[1].run(&client, &parent, &config),
        tasks[2].run(&client, &parent, &config),
    );

    assert_eq!(eth, TaskResult::value("3000"));
    assert!(doge.is_fault(), "{doge:?}");
    assert_eq!(btc, TaskResult::value("60000"));

    // One faulty input out of three is tolerated by default.
    let max = MaxTask::new().run(&[eth, doge, btc]);
    assert_eq!(max, TaskResult::value("60000"));

    assert_eq!(server.requests().len(), 1);

    Ok(())
}

#[tokio::test]
async fn http_task_timeouts_become_faults() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server =
        CannedServer::fixed(CannedResponse::ok("1").delayed(Duration::from_secs(5))).await?;
    let config = Config::default();
    let client = HttpClient::from_config(&config, JsonArrayCodec)?;

    let task = HttpTask::new(symbol_request(&server, "/price", "ETH")?)
        .with_timeout(TaskTimeout::Set(Duration::from_millis(100)));

    let result = task.run(&client, &RequestContext::new(), &config).await;

    assert_eq!(
        result.error.map(|error| error.to_string()),
        Some("http request timed out or interrupted".to_owned())
    );

    Ok(())
}

#[tokio::test]
async fn requests_with_different_headers_get_separate_batches() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::start(echo_by_id).await?;
    let client = HttpClient::from_config(
        &batching_config(2, Duration::from_millis(100)),
        JsonArrayCodec,
    )?;
    let ctx = RequestContext::new();

    let first = symbol_request(&server, "/price", "ETH")?.with_headers(["X-Api-Key", "first"]);
    let second = symbol_request(&server, "/price", "BTC")?.with_headers(["X-Api-Key", "second"]);

    let (first, second) = tokio::join!(client.send(first, &ctx), client.send(second, &ctx));

    assert!(first.is_success(), "{:?}", first.error);
    assert!(second.is_success(), "{:?}", second.error);
    assert_eq!(json_body(&first.body)?, json!({ "echo": "ETH" }));
    assert_eq!(json_body(&second.body)?, json!({ "echo": "BTC" }));

    // Each caller's headers reach the adapter on its own physical call.
    let mut received: Vec<(Option<String>, usize)> = server
        .requests()
        .iter()
        .map(|request| {
            (
                request.header("x-api-key").map(str::to_owned),
                batch_items(request).len(),
            )
        })
        .collect();
    received.sort();

    assert_eq!(
        received,
        vec![(Some("first".to_owned()), 1), (Some("second".to_owned()), 1)]
    );

    Ok(())
}

#[tokio::test]
#[should_panic(expected = "headers must have an even number of elements")]
async fn odd_header_lists_panic_before_joining_a_batch() {
    let _init_guard = pipeline_test::init();

    let client = HttpClient::from_config(
        &batching_config(2, Duration::from_secs(5)),
        JsonArrayCodec,
    )
    .expect("config is valid");

    let url: Url = "http://127.0.0.1:9/price".parse().expect("valid URL");
    let request = HttpRequest::post(url, Default::default()).with_headers(["X-Odd"]);

    let _response = client.send(request, &RequestContext::new()).await;
}

#[tokio::test]
async fn odd_header_lists_do_not_affect_other_callers() -> Result<()> {
    let _init_guard = pipeline_test::init();

    let server = CannedServer::start(echo_by_id).await?;
    let client = HttpClient::from_config(
        &batching_config(2, Duration::from_millis(100)),
        JsonArrayCodec,
    )?;

    let odd = symbol_request(&server, "/price", "DOGE")?.with_headers(["X-Odd"]);
    let odd_caller = {
        let client = client.clone();
        tokio::spawn(async move { client.send(odd, &RequestContext::new()).await })
    };

    let good = client
        .send(symbol_request(&server, "/price", "ETH")?, &RequestContext::new())
        .await;

    let odd_result = odd_caller.await;
    assert!(odd_result.is_err_and(|error| error.is_panic()));

    assert!(good.is_success(), "{:?}", good.error);
    assert_eq!(json_body(&good.body)?, json!({ "echo": "ETH" }));

    let received = server.requests();
    assert_eq!(received.len(), 1);
    assert_eq!(batch_items(&received[0]).len(), 1);

    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    let _init_guard = pipeline_test::init();

    let config = Config {
        batch_size: 0,
        ..Config::default()
    };

    assert!(HttpClient::from_config(&config, JsonArrayCodec).is_err());
}
