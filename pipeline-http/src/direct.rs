//! The direct, one request per call, HTTP executor.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;

use crate::{Config, HttpError, HttpRequest, HttpResponse, RequestContext};


/// Sends each [`HttpRequest`] as its own physical HTTP request.
///
/// This is the path for requests that can't be batched, and the transport
/// used by batch codecs for their single physical call.
#[derive(Clone, Debug)]
pub struct DirectExecutor {
    client: reqwest::Client,

    /// The largest response body accepted, in bytes.
    max_response_bytes: u64,
}

impl DirectExecutor {
    /// Returns an executor that sends requests using `client`.
    pub fn new(client: reqwest::Client, max_response_bytes: u64) -> Self {
        DirectExecutor {
            client,
            max_response_bytes,
        }
    }

    /// Returns an executor with a default client, and the configured response size limit.
    pub fn from_config(config: &Config) -> Self {
        Self::new(reqwest::Client::new(), config.max_response_bytes)
    }

    /// Returns the response size limit, in bytes.
    pub fn max_response_bytes(&self) -> u64 {
        self.max_response_bytes
    }

    /// Sends `request`, and waits for its response or for `ctx` to be done.
    ///
    /// Failures are returned in [`HttpResponse::error`]. If `ctx` is done by the
    /// time the call returns, the error is always [`HttpError::TimedOut`].
    ///
    /// # Panics
    ///
    /// If `request` has an odd number of header elements.
    pub async fn send(&self, request: &HttpRequest, ctx: &RequestContext) -> HttpResponse {
        request.assert_headers_are_paired();

        let start = Utc::now();

        let result = tokio::select! {
            biased;

            () = ctx.done() => Err(HttpError::TimedOut),
            result = self.execute(request) => result,
        };

        let finish = Utc::now();

        let result = if ctx.is_done() {
            Err(HttpError::TimedOut)
        } else {
            result
        };

        let response = match result {
            Ok((status, headers, body)) => {
                let error = (!(200..300).contains(&status)).then(|| HttpError::Status {
                    url: request.url.to_string(),
                    status,
                    message: best_effort_extract_error(&body),
                });

                HttpResponse {
                    status,
                    headers,
                    body,
                    error,
                    start,
                    finish,
                }
            }
            Err(error) => HttpResponse::failed(error, start, finish),
        };

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status_code_group = status_code_group(response.status),
            elapsed = ?response.elapsed(),
            error = ?response.error,
            "http request finished",
        );

        response
    }

    /// Makes the physical request, and reads the body up to the size limit.
    async fn execute(&self, request: &HttpRequest) -> Result<(u16, HeaderMap, Bytes), HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Later headers replace earlier ones with the same name.
        for (name, value) in request.header_pairs() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|error| HttpError::Build(error.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|error| HttpError::Build(error.to_string()))?;

            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);

        if let Some(body) = &request.body {
            let body = serde_json::to_vec(body).map_err(|error| HttpError::Encode(error.to_string()))?;
            builder = builder.body(body);
        }

        let physical = builder
            .build()
            .map_err(|error| HttpError::Build(error.to_string()))?;

        let mut response = self
            .client
            .execute(physical)
            .await
            .map_err(|error| HttpError::Transport(error.to_string()))?;

        let limit = self.max_response_bytes;

        if response.content_length().is_some_and(|length| length > limit) {
            return Err(HttpError::ResponseTooLarge { limit });
        }

        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|error| HttpError::Transport(error.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(HttpError::ResponseTooLarge { limit });
            }

            body.extend_from_slice(&chunk);
        }

        Ok((status, headers, body.freeze()))
    }
}

/// The error fields adapters commonly put in a failed response.
#[derive(Default, Deserialize)]
#[serde(default)]
struct PossibleErrorResponses {
    error: String,
    #[serde(rename = "errorMessage")]
    error_message: String,
}

/// Returns the most useful error message in a failed response body.
///
/// Uses the body's `error` field, then its `errorMessage` field. If neither is
/// present, or the body is not a JSON object with string fields, returns the
/// raw body text.
pub fn best_effort_extract_error(body: &[u8]) -> String {
    let raw = || String::from_utf8_lossy(body).into_owned();

    let Ok(response) = serde_json::from_slice::<PossibleErrorResponses>(body) else {
        return raw();
    };

    if !response.error.is_empty() {
        response.error
    } else if !response.error_message.is_empty() {
        response.error_message
    } else {
        raw()
    }
}

/// Returns the coarse group of an HTTP status code, like `2xx` or `5xx`.
///
/// Log fields use the group, so they have a small number of distinct values.
pub fn status_code_group(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}
