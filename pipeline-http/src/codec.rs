//! Adapter batch protocols.

use std::collections::HashMap;

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tower_batch_endpoint::{BatchItem, BatchResponse, BoxError, EndpointKey, RequestId};

use crate::{best_effort_extract_error, endpoint_url, HttpError, HttpRequest, HttpResponse};

#[cfg(test)]
mod tests;

/// Converts a batch of requests into one physical call, and splits its response.
///
/// Each external adapter has its own batch API, so each needs its own codec.
pub trait BatchCodec: Send + Sync + 'static {
    /// Builds the single physical request for `items`, which all share the batch key `endpoint`.
    ///
    /// `items` is never empty, and is in arrival order. Items with the same
    /// key have the same URL and effective headers.
    fn encode(
        &self,
        endpoint: &str,
        items: &[BatchItem<HttpRequest>],
    ) -> Result<HttpRequest, BoxError>;

    /// Splits the physical `response` into one response per request.
    ///
    /// `ids` are the request ids in arrival order. Codecs should return
    /// [`BatchResponse::ById`] whenever the adapter echoes request ids.
    fn decode(
        &self,
        endpoint: &str,
        response: HttpResponse,
        ids: &[RequestId],
    ) -> Result<BatchResponse<HttpResponse>, BoxError>;
}

/// A batch protocol that wraps request bodies in a JSON array.
///
/// The physical request is a `POST` to the shared URL, with the headers the
/// batched requests share:
///
/// ```json
/// {"requests": [{"id": "<request id>", "data": {...}}, ...]}
/// ```
///
/// The adapter answers with one entry per request. Entries that echo the
/// request `id` are matched by id. If no entry has an id, entries are matched
/// in request order:
///
/// ```json
/// {"responses": [{"id": "<request id>", "statusCode": 200, "data": ..., "error": null}, ...]}
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonArrayCodec;

#[derive(Serialize)]
struct EncodedItem<'a> {
    id: String,
    data: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct DecodedBody {
    responses: Vec<DecodedItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecodedItem {
    id: Option<String>,
    status_code: Option<u16>,
    #[serde(default)]
    data: Value,
    error: Option<String>,
}

impl BatchCodec for JsonArrayCodec {
    fn encode(
        &self,
        endpoint: &str,
        items: &[BatchItem<HttpRequest>],
    ) -> Result<HttpRequest, BoxError> {
        let first = items.first().ok_or("can not encode an empty batch")?;

        if items.iter().any(|item| item.request.endpoint() != endpoint) {
            return Err("batched requests must share their URL and headers".into());
        }

        let empty = Map::new();

        let requests: Vec<EncodedItem<'_>> = items
            .iter()
            .map(|item| EncodedItem {
                id: item.id.to_string(),
                data: item.request.body.as_ref().unwrap_or(&empty),
            })
            .collect();

        let mut body = Map::new();
        body.insert("requests".to_owned(), serde_json::to_value(requests)?);

        Ok(HttpRequest::new(Method::POST, first.request.url.clone())
            .with_headers(first.request.headers.iter().cloned())
            .with_body(body))
    }

    fn decode(
        &self,
        endpoint: &str,
        response: HttpResponse,
        _ids: &[RequestId],
    ) -> Result<BatchResponse<HttpResponse>, BoxError> {
        let decoded: DecodedBody = serde_json::from_slice(&response.body)?;

        let with_ids = decoded
            .responses
            .iter()
            .filter(|item| item.id.is_some())
            .count();

        if with_ids == 0 {
            let responses = decoded
                .responses
                .into_iter()
                .map(|item| split_response(endpoint, &response, item))
                .collect::<Result<_, _>>()?;

            return Ok(BatchResponse::Positional(responses));
        }

        if with_ids != decoded.responses.len() {
            return Err("batch response mixes entries with and without request ids".into());
        }

        let mut responses = HashMap::with_capacity(decoded.responses.len());
        for mut item in decoded.responses {
            let id: RequestId = item.id.take().unwrap_or_default().parse()?;
            responses.insert(id, split_response(endpoint, &response, item)?);
        }

        Ok(BatchResponse::ById(responses))
    }
}

/// Builds the response for one entry in a physical batch response.
fn split_response(
    endpoint: &str,
    physical: &HttpResponse,
    item: DecodedItem,
) -> Result<HttpResponse, BoxError> {
    let url = endpoint_url(endpoint);
    let status = item.status_code.unwrap_or(physical.status);
    let body = Bytes::from(serde_json::to_vec(&item.data)?);

    let error = match item.error {
        Some(message) => Some(HttpError::Status {
            url: url.to_owned(),
            status,
            message,
        }),
        None if !(200..300).contains(&status) => Some(HttpError::Status {
            url: url.to_owned(),
            status,
            message: best_effort_extract_error(&body),
        }),
        None => None,
    };

    Ok(HttpResponse {
        status,
        headers: physical.headers.clone(),
        body,
        error,
        start: physical.start,
        finish: physical.finish,
    })
}
