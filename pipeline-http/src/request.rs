//! Outbound HTTP requests and their responses.

use std::{
    collections::{hash_map::DefaultHasher, BTreeMap},
    hash::{Hash, Hasher},
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{header::HeaderMap, Method, Url};
use serde_json::{Map, Value};

use tower_batch_endpoint::EndpointKey;

use crate::HttpError;


/// An outbound call made by a pipeline task.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: Method,

    /// The target URL. Requests for the same URL, with the same headers, can share a batch.
    pub url: Url,

    /// Extra headers, as a flat list of name and value pairs.
    ///
    /// The list must have an even number of elements.
    pub headers: Vec<String>,

    /// The request body, sent as JSON.
    pub body: Option<Map<String, Value>>,
}

impl HttpRequest {
    /// Returns a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        HttpRequest {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Returns a `POST` request with a JSON `body`.
    pub fn post(url: Url, body: Map<String, Value>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// Sets the flat list of header names and values.
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = Some(body);
        self
    }

    /// Checks that every header name has a value.
    ///
    /// # Panics
    ///
    /// If the header list has an odd number of elements. Dropping the unpaired
    /// element could silently change the meaning of another header.
    pub fn assert_headers_are_paired(&self) {
        assert!(
            self.headers.len() % 2 == 0,
            "headers must have an even number of elements"
        );
    }

    /// Returns the headers as `(name, value)` pairs.
    ///
    /// # Panics
    ///
    /// If the header list has an odd number of elements.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.assert_headers_are_paired();

        self.headers
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }

    /// Returns the headers that are actually sent, keyed by lowercase name.
    ///
    /// A repeated name keeps its last value.
    ///
    /// # Panics
    ///
    /// If the header list has an odd number of elements.
    pub fn effective_headers(&self) -> BTreeMap<String, &str> {
        self.header_pairs()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect()
    }
}

impl EndpointKey for HttpRequest {
    /// Returns the URL, followed by a fingerprint of the effective headers if there are any.
    ///
    /// A batch is sent with one set of headers, so requests with different
    /// headers never share a batch. Header values are hashed, so secrets like
    /// API keys stay out of batch keys and logs.
    fn endpoint(&self) -> String {
        let headers = self.effective_headers();

        if headers.is_empty() {
            return self.url.as_str().to_owned();
        }

        let mut hasher = DefaultHasher::new();
        headers.hash(&mut hasher);

        format!("{} headers={:016x}", self.url, hasher.finish())
    }
}

/// Returns the URL part of a batch endpoint key.
///
/// Serialized URLs never contain spaces, so the URL ends at the first one.
pub fn endpoint_url(endpoint: &str) -> &str {
    endpoint.split_once(' ').map_or(endpoint, |(url, _)| url)
}

/// The answer to one [`HttpRequest`], from the batched or the direct path.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// The HTTP status code, or zero if no response was received.
    pub status: u16,

    /// The response headers.
    pub headers: HeaderMap,

    /// The raw response body.
    pub body: Bytes,

    /// The reason the call failed, if it did.
    ///
    /// Non-success statuses are errors, but their body and headers are kept.
    pub error: Option<HttpError>,

    /// When the call started.
    pub start: DateTime<Utc>,

    /// When the call finished.
    pub finish: DateTime<Utc>,
}

impl HttpResponse {
    /// Returns a response received at the current time.
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let now = Utc::now();

        HttpResponse {
            status,
            headers,
            body: body.into(),
            error: None,
            start: now,
            finish: now,
        }
    }

    /// Returns a response for a call that failed with `error`.
    pub fn failed(error: HttpError, start: DateTime<Utc>, finish: DateTime<Utc>) -> Self {
        HttpResponse {
            status: 0,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            error: Some(error),
            start,
            finish,
        }
    }

    /// Returns `true` if the call succeeded with a `2xx` status.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    /// Returns the wall-clock time the call took.
    pub fn elapsed(&self) -> Duration {
        (self.finish - self.start).to_std().unwrap_or_default()
    }

    /// Returns the body, or the call's error.
    pub fn into_result(self) -> Result<Bytes, HttpError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.body),
        }
    }
}
