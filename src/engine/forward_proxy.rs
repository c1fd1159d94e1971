//! Built-in plain-HTTP forward proxy engine.
//!
//! Client connections are served by hyper's HTTP/1 server and requests are
//! forwarded through the legacy hyper-util client. Request and response
//! bodies are buffered so the captured `Flow` sees them whole; both are
//! capped at `max_body_bytes` and bounded by `upstream_timeout`. `CONNECT` is
//! tunnelled opaquely and produces no flow.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::ext::ReasonPhrase;
use hyper::header::{self, HeaderMap, HeaderName};
use hyper::http::response::Parts;
use hyper::http::uri::Authority;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::configuration::types::ProxyEndpoint;
use crate::data_capture::types::{Flow, FlowRequest, FlowResponse};
use crate::engine::types::{FlowHooks, InterceptionEngine, ReadySignal, ShutdownSignal};
use crate::error_handling::types::EngineError;

const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that only apply to a single hop.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

type UpstreamClient = Client<HttpConnector, Full<Bytes>>;

pub struct ForwardProxyEngine {
    upstream_timeout: Duration,
    max_body_bytes: usize,
}

impl ForwardProxyEngine {
    pub fn new(upstream_timeout: Duration) -> Self {
        Self {
            upstream_timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Bodies larger than `limit` are refused instead of buffered.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

impl Default for ForwardProxyEngine {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_TIMEOUT)
    }
}

#[async_trait]
impl InterceptionEngine for ForwardProxyEngine {
    fn name(&self) -> &str {
        "forward-proxy"
    }

    async fn run(
        &self,
        endpoint: ProxyEndpoint,
        hooks: Arc<dyn FlowHooks>,
        mut ready: ReadySignal,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), EngineError> {
        let listener = TcpListener::bind((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(EngineError::BindFailed)?;
        let addr = listener.local_addr()?;
        info!("Forward proxy listening on {}", addr);
        ready.notify(addr);

        let proxy = Arc::new(ProxyService::new(
            hooks,
            self.upstream_timeout,
            self.max_body_bytes,
        ));
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let proxy = proxy.clone();
                        connections.spawn(async move {
                            let handler = service_fn(move |req| {
                                let proxy = proxy.clone();
                                async move { Ok::<_, Infallible>(proxy.handle(req).await) }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), handler)
                                .with_upgrades()
                                .await
                            {
                                debug!("Proxy connection from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept error on {}: {}", addr, e),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        connections.shutdown().await;
        info!("Forward proxy on {} stopped", addr);
        Ok(())
    }
}

/// Why a body could not be buffered.
#[derive(Debug)]
enum BodyFailure {
    TooLarge(usize),
    TimedOut(Duration),
    Broken(String),
}

impl fmt::Display for BodyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyFailure::TooLarge(limit) => write!(f, "body exceeds {} bytes", limit),
            BodyFailure::TimedOut(after) => write!(f, "body not complete after {:?}", after),
            BodyFailure::Broken(detail) => write!(f, "body read failed: {}", detail),
        }
    }
}

/// Why the origin exchange produced no response.
#[derive(Debug)]
enum UpstreamFailure {
    Unreachable(String),
    TimedOut(Duration),
    Body(BodyFailure),
}

impl UpstreamFailure {
    fn status(&self) -> StatusCode {
        match self {
            UpstreamFailure::TimedOut(_) | UpstreamFailure::Body(BodyFailure::TimedOut(_)) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::Unreachable(detail) => write!(f, "upstream request failed: {}", detail),
            UpstreamFailure::TimedOut(after) => {
                write!(f, "upstream did not respond within {:?}", after)
            }
            UpstreamFailure::Body(failure) => write!(f, "upstream response {}", failure),
        }
    }
}

/// Joins an error with its source chain.
fn describe(error: &dyn StdError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Buffers `body`, giving up past `limit` bytes or after `deadline`. Nothing
/// is allocated up front from a declared length.
async fn collect_limited<B>(body: B, limit: usize, deadline: Duration) -> Result<Bytes, BodyFailure>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    match tokio::time::timeout(deadline, Limited::new(body, limit).collect()).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(BodyFailure::TooLarge(limit))
        }
        Ok(Err(e)) => Err(BodyFailure::Broken(describe(e.as_ref()))),
        Err(_) => Err(BodyFailure::TimedOut(deadline)),
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Removes hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Absolute `http://` URI for an absolute-form or origin-form request.
fn resolve_target(uri: &Uri, headers: &HeaderMap) -> Result<Uri, EngineError> {
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(_)) if scheme.eq_ignore_ascii_case("http") => Ok(uri.clone()),
        (Some(scheme), _) => Err(EngineError::Protocol(format!(
            "unsupported request scheme: {}",
            scheme
        ))),
        (None, _) => {
            let host = headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    EngineError::Protocol("origin-form request without Host header".into())
                })?;
            let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
            format!("http://{}{}", host, path)
                .parse()
                .map_err(|e| EngineError::Protocol(format!("invalid request target: {}", e)))
        }
    }
}

/// `host:port` to dial for a `CONNECT` authority.
fn tunnel_target(authority: &Authority) -> String {
    match authority.port_u16() {
        Some(_) => authority.as_str().to_string(),
        None => format!("{}:443", authority.host()),
    }
}

/// Status line text as sent by the origin, falling back to the canonical one.
fn reason_phrase(parts: &Parts) -> String {
    parts
        .extensions
        .get::<ReasonPhrase>()
        .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned())
        .or_else(|| parts.status.canonical_reason().map(str::to_string))
        .unwrap_or_default()
}

fn simple_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

struct ProxyService {
    client: UpstreamClient,
    hooks: Arc<dyn FlowHooks>,
    upstream_timeout: Duration,
    max_body_bytes: usize,
}

impl ProxyService {
    fn new(hooks: Arc<dyn FlowHooks>, upstream_timeout: Duration, max_body_bytes: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(upstream_timeout));
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);
        Self {
            client,
            hooks,
            upstream_timeout,
            max_body_bytes,
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let timestamp_start = SystemTime::now();
        if req.method() == Method::CONNECT {
            return self.tunnel(req).await;
        }

        let (parts, body) = req.into_parts();
        let target = match resolve_target(&parts.uri, &parts.headers) {
            Ok(target) => target,
            Err(e) => {
                debug!("Rejecting {} {}: {}", parts.method, parts.uri, e);
                return simple_response(StatusCode::BAD_REQUEST);
            }
        };
        let body = match collect_limited(body, self.max_body_bytes, self.upstream_timeout).await {
            Ok(body) => body,
            Err(failure) => {
                debug!("Rejecting {} {}: request {}", parts.method, target, failure);
                return simple_response(match failure {
                    BodyFailure::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                    BodyFailure::TimedOut(_) => StatusCode::REQUEST_TIMEOUT,
                    BodyFailure::Broken(_) => StatusCode::BAD_REQUEST,
                });
            }
        };

        let mut flow = Flow::new(FlowRequest {
            method: parts.method.to_string(),
            url: target.to_string(),
            headers: header_pairs(&parts.headers),
            body: body.to_vec(),
            timestamp_start,
        });
        self.hooks.on_request_start(&flow);

        let mut upstream = Request::new(Full::new(body));
        *upstream.method_mut() = parts.method;
        *upstream.uri_mut() = target;
        *upstream.headers_mut() = parts.headers;
        strip_hop_by_hop_headers(upstream.headers_mut());

        match self.exchange(upstream).await {
            Ok((parts, body)) => {
                flow.response = Some(FlowResponse {
                    status_code: parts.status.as_u16(),
                    reason: reason_phrase(&parts),
                    headers: header_pairs(&parts.headers),
                    body: body.to_vec(),
                    timestamp_end: SystemTime::now(),
                });
                self.hooks.on_response_complete(&flow);

                let mut relayed = Response::from_parts(parts, Full::new(body));
                strip_hop_by_hop_headers(relayed.headers_mut());
                relayed
            }
            Err(failure) => {
                flow.error = Some(failure.to_string());
                self.hooks.on_flow_error(&flow);
                simple_response(failure.status())
            }
        }
    }

    /// Sends the request and buffers the origin's response.
    async fn exchange(&self, upstream: Request<Full<Bytes>>) -> Result<(Parts, Bytes), UpstreamFailure> {
        let response = tokio::time::timeout(self.upstream_timeout, self.client.request(upstream))
            .await
            .map_err(|_| UpstreamFailure::TimedOut(self.upstream_timeout))?
            .map_err(|e| UpstreamFailure::Unreachable(describe(&e)))?;
        let (parts, body) = response.into_parts();
        let body = collect_limited(body, self.max_body_bytes, self.upstream_timeout)
            .await
            .map_err(UpstreamFailure::Body)?;
        Ok((parts, body))
    }

    async fn tunnel(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let Some(authority) = req.uri().authority().cloned() else {
            return simple_response(StatusCode::BAD_REQUEST);
        };
        let target = tunnel_target(&authority);
        let mut upstream = match tokio::time::timeout(
            self.upstream_timeout,
            TcpStream::connect(target.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("CONNECT to {} failed: {}", target, e);
                return simple_response(StatusCode::BAD_GATEWAY);
            }
            Err(_) => {
                debug!("CONNECT to {} timed out", target);
                return simple_response(StatusCode::GATEWAY_TIMEOUT);
            }
        };

        let on_upgrade = hyper::upgrade::on(req);
        tokio::spawn(async move {
            let upgraded = match on_upgrade.await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    debug!("CONNECT upgrade for {} failed: {}", target, e);
                    return;
                }
            };
            debug!("Tunnelling to {}", target);
            let mut client = TokioIo::new(upgraded);
            if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                debug!("Tunnel to {} ended: {}", target, e);
            }
        });
        simple_response(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body_util::StreamBody;
    use hyper::body::Frame;
    use hyper::header::HeaderValue;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::watch;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<(&'static str, Flow)>>,
    }

    impl RecordingHooks {
        fn events(&self) -> Vec<(&'static str, Flow)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl FlowHooks for RecordingHooks {
        fn on_request_start(&self, flow: &Flow) {
            self.events.lock().unwrap().push(("request", flow.clone()));
        }

        fn on_response_complete(&self, flow: &Flow) {
            self.events.lock().unwrap().push(("response", flow.clone()));
        }

        fn on_flow_error(&self, flow: &Flow) {
            self.events.lock().unwrap().push(("error", flow.clone()));
        }
    }

    struct RunningEngine {
        addr: SocketAddr,
        hooks: Arc<RecordingHooks>,
        stop: watch::Sender<bool>,
        task: JoinHandle<Result<(), EngineError>>,
    }

    impl RunningEngine {
        async fn start(engine: ForwardProxyEngine) -> Self {
            let hooks = Arc::new(RecordingHooks::default());
            let (ready, ready_rx) = ReadySignal::channel();
            let (stop, stop_rx) = watch::channel(false);
            let engine_hooks: Arc<dyn FlowHooks> = hooks.clone();
            let task = tokio::spawn(async move {
                engine
                    .run(
                        ProxyEndpoint::new("127.0.0.1", 0),
                        engine_hooks,
                        ready,
                        ShutdownSignal::new(stop_rx),
                    )
                    .await
            });
            let addr = ready_rx.await.unwrap();
            Self {
                addr,
                hooks,
                stop,
                task,
            }
        }

        async fn stop(self) {
            self.stop.send_replace(true);
            self.task.await.unwrap().unwrap();
        }
    }

    /// Reads from `stream` until the end of a response head, or EOF.
    async fn read_head(stream: &mut TcpStream) -> String {
        let read = async {
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            String::from_utf8_lossy(&seen).into_owned()
        };
        tokio::time::timeout(Duration::from_secs(5), read).await.unwrap()
    }

    async fn send(proxy: SocketAddr, request: &[u8]) -> String {
        let mut client = TcpStream::connect(proxy).await.unwrap();
        client.write_all(request).await.unwrap();
        read_head(&mut client).await
    }

    fn closed_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    /// One-shot origin that records the request head and body it received.
    async fn spawn_origin(response: &'static [u8]) -> (SocketAddr, JoinHandle<String>) {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = origin.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = origin.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut seen = String::new();
            let mut length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        length = value.trim().parse().unwrap();
                    }
                }
                seen.push_str(&line);
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).await.unwrap();
            seen.push_str(&String::from_utf8_lossy(&body));
            reader.get_mut().write_all(response).await.unwrap();
            reader.get_mut().shutdown().await.unwrap();
            seen
        });
        (addr, handle)
    }

    #[test]
    fn test_resolve_absolute_and_origin_form() {
        let empty = HeaderMap::new();
        let uri: Uri = "http://a.com:8000/x?y=1".parse().unwrap();
        assert_eq!(
            resolve_target(&uri, &empty).unwrap().to_string(),
            "http://a.com:8000/x?y=1"
        );

        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("[::1]:81"));
        let uri: Uri = "/p?q=2".parse().unwrap();
        let target = resolve_target(&uri, &headers).unwrap();
        assert_eq!(target.host(), Some("[::1]"));
        assert_eq!(target.port_u16(), Some(81));
        assert_eq!(target.to_string(), "http://[::1]:81/p?q=2");

        let https: Uri = "https://a.com/".parse().unwrap();
        assert!(resolve_target(&https, &empty).is_err());
        let no_host: Uri = "/p".parse().unwrap();
        assert!(resolve_target(&no_host, &empty).is_err());
    }

    #[test]
    fn test_strip_hop_by_hop_honours_connection_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        strip_hop_by_hop_headers(&mut headers);
        let names: Vec<_> = headers.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["accept"]);
    }

    #[test]
    fn test_tunnel_target_defaults_to_443() {
        let plain: Authority = "example.test".parse().unwrap();
        assert_eq!(tunnel_target(&plain), "example.test:443");
        let v6: Authority = "[::1]".parse().unwrap();
        assert_eq!(tunnel_target(&v6), "[::1]:443");
        let explicit: Authority = "example.test:8443".parse().unwrap();
        assert_eq!(tunnel_target(&explicit), "example.test:8443");
    }

    #[tokio::test]
    async fn test_collect_limited_stops_at_limit_without_preallocating() {
        static CHUNK: [u8; 512] = [0; 512];
        let endless = StreamBody::new(stream::repeat_with(|| {
            Ok::<_, Infallible>(Frame::data(Bytes::from_static(&CHUNK)))
        }));
        let result = collect_limited(endless, 4096, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(BodyFailure::TooLarge(4096))));
    }

    #[tokio::test]
    async fn test_collect_limited_times_out_on_stalled_body() {
        let stalled = StreamBody::new(stream::pending::<Result<Frame<Bytes>, Infallible>>());
        let result = collect_limited(stalled, 4096, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(BodyFailure::TimedOut(_))));

        let small = Full::new(Bytes::from_static(b"ok"));
        let body = collect_limited(small, 4096, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_forwards_and_captures_end_to_end() {
        let response: &'static [u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nSet-Cookie: sid=1; Path=/\r\n\r\n4\r\npong\r\n0\r\n\r\n";
        let (origin, origin_task) = spawn_origin(response).await;
        let engine = RunningEngine::start(ForwardProxyEngine::default()).await;

        let mut client = TcpStream::connect(engine.addr).await.unwrap();
        let request = format!(
            "POST http://{}/ping HTTP/1.1\r\nHost: {}\r\nProxy-Connection: keep-alive\r\nConnection: close\r\nContent-Length: 4\r\n\r\nping",
            origin, origin
        );
        client.write_all(request.as_bytes()).await.unwrap();
        let mut relayed = String::new();
        client.read_to_string(&mut relayed).await.unwrap();
        assert!(relayed.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(relayed.contains("set-cookie: sid=1; Path=/"));
        assert!(relayed.ends_with("pong"));

        let seen = origin_task.await.unwrap();
        assert!(seen.starts_with("POST /ping HTTP/1.1\r\n"));
        assert!(!seen.to_ascii_lowercase().contains("proxy-connection"));
        assert!(seen.ends_with("ping"));

        let events = engine.hooks.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "request");
        let (kind, flow) = &events[1];
        assert_eq!(*kind, "response");
        assert_eq!(flow.request.url, format!("http://{}/ping", origin));
        assert_eq!(flow.request.body, b"ping");
        let names: Vec<_> = flow.request.headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec!["host", "proxy-connection", "connection", "content-length"]
        );
        let captured = flow.response.as_ref().unwrap();
        assert_eq!(captured.status_code, 200);
        assert_eq!(captured.reason, "OK");
        assert_eq!(captured.body, b"pong");
        assert!(captured.timestamp_end >= flow.request.timestamp_start);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_origin_reports_flow_error() {
        let engine = RunningEngine::start(ForwardProxyEngine::new(Duration::from_secs(2))).await;
        let request = format!(
            "GET http://127.0.0.1:{}/gone HTTP/1.1\r\nConnection: close\r\n\r\n",
            closed_port()
        );
        let head = send(engine.addr, request.as_bytes()).await;
        assert!(head.starts_with("HTTP/1.1 502 Bad Gateway"), "{}", head);

        let events = engine.hooks.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "request");
        assert_eq!(events[1].0, "error");
        assert!(events[1].1.error.is_some());
        assert!(events[1].1.response.is_none());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_unusable_targets_get_400() {
        let engine = RunningEngine::start(ForwardProxyEngine::default()).await;
        let head = send(engine.addr, b"GET /nohost HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(head.starts_with("HTTP/1.1 400"), "{}", head);
        let head = send(
            engine.addr,
            b"GET https://a.com/ HTTP/1.1\r\nHost: a.com\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 400"), "{}", head);
        assert!(engine.hooks.events().is_empty());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_hostile_body_lengths_are_refused() {
        let engine = RunningEngine::start(
            ForwardProxyEngine::new(Duration::from_millis(300)).with_max_body_bytes(1024),
        )
        .await;

        let head = send(
            engine.addr,
            b"POST http://127.0.0.1:1/ HTTP/1.1\r\nHost: 127.0.0.1:1\r\nContent-Length: 100000000000000\r\n\r\nab",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 408"), "{}", head);

        let head = send(
            engine.addr,
            b"POST http://127.0.0.1:1/ HTTP/1.1\r\nHost: 127.0.0.1:1\r\nTransfer-Encoding: chunked\r\n\r\nFFFFFFFFFFFF\r\nab",
        )
        .await;
        assert!(head.starts_with("HTTP/1.1 408"), "{}", head);

        assert!(engine.hooks.events().is_empty());
        assert!(!engine.task.is_finished());

        let request = format!(
            "GET http://127.0.0.1:{}/ HTTP/1.1\r\nConnection: close\r\n\r\n",
            closed_port()
        );
        let head = send(engine.addr, request.as_bytes()).await;
        assert!(head.starts_with("HTTP/1.1 502"), "{}", head);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stalled_origin_is_cut_off() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = origin.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nabc")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let engine = RunningEngine::start(ForwardProxyEngine::new(Duration::from_millis(300))).await;

        let request = format!(
            "GET http://{}/stream HTTP/1.1\r\nConnection: close\r\n\r\n",
            origin_addr
        );
        let head = send(engine.addr, request.as_bytes()).await;
        assert!(head.starts_with("HTTP/1.1 504"), "{}", head);

        let events = engine.hooks.events();
        assert_eq!(events.last().unwrap().0, "error");
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_origin_response_is_not_buffered() {
        static BIG: [u8; 4096] = [b'x'; 4096];
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = origin.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n")
                .await;
            let _ = stream.write_all(&BIG).await;
        });
        let engine = RunningEngine::start(
            ForwardProxyEngine::new(Duration::from_secs(2)).with_max_body_bytes(1024),
        )
        .await;

        let request = format!(
            "GET http://{}/big HTTP/1.1\r\nConnection: close\r\n\r\n",
            origin_addr
        );
        let head = send(engine.addr, request.as_bytes()).await;
        assert!(head.starts_with("HTTP/1.1 502"), "{}", head);

        let events = engine.hooks.events();
        let (kind, flow) = events.last().unwrap();
        assert_eq!(*kind, "error");
        assert!(flow.error.as_deref().unwrap().contains("exceeds 1024 bytes"));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_connect_is_tunnelled_without_capture() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = echo.accept().await.unwrap();
            let (mut read, mut write) = stream.split();
            let _ = tokio::io::copy(&mut read, &mut write).await;
        });
        let engine = RunningEngine::start(ForwardProxyEngine::default()).await;

        let mut client = TcpStream::connect(engine.addr).await.unwrap();
        let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", echo_addr);
        client.write_all(request.as_bytes()).await.unwrap();
        let head = read_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200"), "{}", head);

        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&echoed, b"hello");
        assert!(engine.hooks.events().is_empty());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_returns_immediately() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let (ready, mut ready_rx) = ReadySignal::channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let result = ForwardProxyEngine::default()
            .run(
                ProxyEndpoint::new("127.0.0.1", port),
                Arc::new(RecordingHooks::default()),
                ready,
                ShutdownSignal::new(stop_rx),
            )
            .await;
        assert!(matches!(result, Err(EngineError::BindFailed(_))));
        assert!(ready_rx.try_recv().is_err());
    }
}
