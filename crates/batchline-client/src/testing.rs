//! Test doubles shared by the unit tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use batchline_core::{ParalyzeReason, RequestData};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::{
    Completion, HandlerRouter, Headers, HttpResponse, Multiplexer, MultiplexerConfig, Observer,
    PhysicalTransfer, Prober, ProberFactory, ResponseHandler, TransferId, Transport,
};

pub(crate) type TestMux = Multiplexer<HandlerRouter, RecordingTransport, ManualProbers>;

pub(crate) fn mux() -> TestMux {
    Multiplexer::new(
        MultiplexerConfig::default(),
        HandlerRouter::new(),
        RecordingTransport::default(),
        ManualProbers::default(),
    )
}

pub(crate) trait TestMuxExt {
    fn observe(&mut self) -> ObserverLog;
    fn probe_log(&self) -> Vec<String>;
}

impl TestMuxExt for TestMux {
    fn observe(&mut self) -> ObserverLog {
        let log = ObserverLog::default();
        self.subscribe(log.clone());
        log
    }

    fn probe_log(&self) -> Vec<String> {
        self.probers().log.lock().unwrap().clone()
    }
}

pub(crate) fn ok(body: &str) -> Completion {
    Completion::Response(HttpResponse::new(200, body))
}

pub(crate) fn status(code: u16) -> Completion {
    Completion::Response(HttpResponse::new(code, ""))
}

/// Remembers what it was asked to do; completions are fed in by hand.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    pub started: Vec<PhysicalTransfer>,
    pub aborted: Vec<TransferId>,
}

impl Transport for RecordingTransport {
    fn start(&mut self, transfer: &PhysicalTransfer) {
        self.started.push(transfer.clone());
    }

    fn abort(&mut self, id: TransferId) {
        self.aborted.push(id);
    }
}

/// Builds probers that only log `start`/`stop`; restoration is fed in by hand.
#[derive(Debug, Default)]
pub(crate) struct ManualProbers {
    log: Arc<Mutex<Vec<String>>>,
}

impl ProberFactory for ManualProbers {
    type Prober = ManualProber;

    fn create(&mut self, url: &str, _headers: &Headers) -> ManualProber {
        ManualProber {
            url: url.to_string(),
            running: false,
            log: self.log.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ManualProber {
    url: String,
    running: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Prober for ManualProber {
    fn url(&self) -> &str {
        &self.url
    }

    fn start(&mut self) {
        self.running = true;
        self.log.lock().unwrap().push("start".into());
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.log.lock().unwrap().push("stop".into());
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[derive(Debug, Default)]
struct Recorded {
    entries: Vec<(String, Value)>,
    failures: Vec<RequestData>,
}

/// Response handler that records what reaches it.
pub(crate) struct Recorder(Arc<Mutex<Recorded>>);

#[derive(Clone)]
pub(crate) struct RecorderLog(Arc<Mutex<Recorded>>);

impl Recorder {
    pub(crate) fn new() -> (Self, RecorderLog) {
        let shared = Arc::new(Mutex::new(Recorded::default()));
        (Self(shared.clone()), RecorderLog(shared))
    }
}

impl ResponseHandler for Recorder {
    fn handle(&mut self, action: &str, payload: &Value) {
        self.0
            .lock()
            .unwrap()
            .entries
            .push((action.to_string(), payload.clone()));
    }

    fn failure(&mut self, request: &RequestData) {
        self.0.lock().unwrap().failures.push(request.clone());
    }
}

impl RecorderLog {
    pub(crate) fn entries(&self) -> Vec<(String, Value)> {
        self.0.lock().unwrap().entries.clone()
    }

    pub(crate) fn failures(&self) -> Vec<RequestData> {
        self.0.lock().unwrap().failures.clone()
    }
}

/// Observer recording event names, optionally refusing every send.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObserverLog {
    events: Arc<Mutex<Vec<String>>>,
    probe_urls: Arc<Mutex<Vec<String>>>,
    veto: bool,
}

impl ObserverLog {
    pub(crate) fn vetoing() -> Self {
        Self {
            veto: true,
            ..Self::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn probe_urls(&self) -> Vec<String> {
        self.probe_urls.lock().unwrap().clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl Observer for ObserverLog {
    fn connection_paralyzed(&mut self, reason: ParalyzeReason) {
        self.push(format!("paralyzed:{reason}"));
    }

    fn connection_interrupted(&mut self, prober: &dyn Prober) {
        self.probe_urls.lock().unwrap().push(prober.url().to_string());
        self.push("interrupted");
    }

    fn connection_restored(&mut self) {
        self.push("restored");
    }

    fn before_send(&mut self, _transfer: &PhysicalTransfer) -> bool {
        if self.veto {
            self.push("suppressed");
        }
        !self.veto
    }

    fn after_send(&mut self, _transfer: &PhysicalTransfer) {
        self.push("after_send");
    }
}

/// A request as seen by [`TestServer`].
#[derive(Debug, Clone)]
pub(crate) struct ReceivedRequest {
    pub method: Method,
    /// Path and query, e.g. `/grommunio.php?service=ping`.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl ReceivedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct Reply {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: String,
    requests: mpsc::UnboundedSender<ReceivedRequest>,
}

/// HTTP server answering every request with the same response.
pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<ReceivedRequest>,
}

impl TestServer {
    pub(crate) async fn start(status: u16, headers: &[(&str, &str)], body: &str) -> Self {
        let (tx, requests) = mpsc::unbounded_channel();
        let reply = Reply {
            status: StatusCode::from_u16(status).unwrap(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
            requests: tx,
        };
        let app = Router::new().fallback(answer).with_state(reply);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, requests }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}/grommunio.php", self.addr)
    }

    /// The next request received.
    pub(crate) async fn request(&mut self) -> ReceivedRequest {
        self.requests.recv().await.unwrap()
    }
}

async fn answer(
    State(reply): State<Reply>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _ = reply.requests.send(ReceivedRequest {
        method,
        uri: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let mut response = (reply.status, reply.body).into_response();
    let out = response.headers_mut();
    out.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in &reply.headers {
        out.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    response
}

/// A URL nothing listens on.
pub(crate) async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/grommunio.php")
}
