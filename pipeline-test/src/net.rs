//! Canned HTTP servers for network tests.
//!
//! Each server answers requests with a responder function, and records what
//! it received, so tests can check what a client sent without a real upstream.

use std::{
    collections::HashMap,
    fmt, io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Incoming, header::CONTENT_TYPE, server::conn::http1, service::service_fn, Request,
    Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, task::JoinHandle};


/// A request received by a [`CannedServer`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordedRequest {
    /// The request method, like `POST`.
    pub method: String,

    /// The request target, including any query string.
    pub path: String,

    /// The request headers, with lower case names.
    pub headers: HashMap<String, String>,

    /// The raw request body.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Returns the value of the header `name`, if it was sent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the body as UTF-8 text, replacing invalid bytes.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The response a [`CannedServer`] sends for a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CannedResponse {
    /// The HTTP status code.
    pub status: u16,

    /// The response body.
    pub body: String,

    /// How long to wait before responding.
    pub delay: Duration,
}

impl CannedResponse {
    /// A `200 OK` response with `body`.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    /// A response with `status` and `body`.
    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        CannedResponse {
            status,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    /// Delays this response by `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = dyn Fn(&RecordedRequest) -> CannedResponse + Send + Sync;

/// A local HTTP server that answers every request using a responder function,
/// and records the requests it receives.
///
/// The server stops when it is dropped.
pub struct CannedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    accept_task: JoinHandle<()>,
}

impl CannedServer {
    /// Starts a server that answers every request with `response`.
    pub async fn fixed(response: CannedResponse) -> io::Result<Self> {
        Self::start(move |_request| response.clone()).await
    }

    /// Starts a server on a random local port, that answers each request
    /// with the result of `responder`.
    pub async fn start<F>(responder: F) -> io::Result<Self>
    where
        F: Fn(&RecordedRequest) -> CannedResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let requests = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Responder> = Arc::new(responder);

        let accept_task = tokio::spawn({
            let requests = requests.clone();

            async move {
                loop {
                    let (stream, _peer) = match listener.accept().await {
                        Ok(connection) => connection,
                        Err(error) => {
                            tracing::warn!(?error, "canned server accept failed");
                            continue;
                        }
                    };

                    let io = TokioIo::new(stream);
                    let requests = requests.clone();
                    let responder = responder.clone();
                    let service = service_fn(move |request| {
                        answer(request, requests.clone(), responder.clone())
                    });

                    tokio::spawn(async move {
                        if let Err(error) =
                            http1::Builder::new().serve_connection(io, service).await
                        {
                            tracing::debug!(?error, "canned server connection closed with error");
                        }
                    });
                }
            }
        });

        Ok(CannedServer {
            addr,
            requests,
            accept_task,
        })
    }

    /// Returns the server's local address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns an absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Returns every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("previous task panicked while holding the requests mutex")
            .clone()
    }
}

impl fmt::Debug for CannedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CannedServer")
            .field("addr", &self.addr)
            .field("requests", &self.requests().len())
            .finish()
    }
}

impl Drop for CannedServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Records `request`, and answers it with the canned response for it.
async fn answer(
    request: Request<Incoming>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responder: Arc<Responder>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = request.into_parts();
    let body = body.collect().await?.to_bytes();

    let request = RecordedRequest {
        method: parts.method.to_string(),
        path: parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_owned(), ToString::to_string),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_owned())))
            .collect(),
        body: body.to_vec(),
    };

    let canned = responder(&request);

    requests
        .lock()
        .expect("previous task panicked while holding the requests mutex")
        .push(request);

    if !canned.delay.is_zero() {
        tokio::time::sleep(canned.delay).await;
    }

    let status = StatusCode::from_u16(canned.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(canned.body)))
        .expect("valid response"))
}
