//! HTTP trigger adapter: listens on `(host, port)`, matches inbound
//! requests against registered `(method, pattern)` routes, and drives the
//! [`Executor`] for each one.
//!
//! Built on `hyper` + `hyper-util`'s auto connection builder and graceful
//! shutdown tracker: a built-in HTTP server powered by Hyper, with one
//! accept-loop task per listener and one connection task per accepted
//! socket.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request as HyperRequest, Response as HyperResponse, StatusCode};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder as AutoBuilder, graceful::GracefulShutdown},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    capability::AppAdapters,
    context::{ContextPool, TriggerKind},
    executor::Executor,
    registry::Registry,
};

#[cfg(feature = "http-tls")]
use tokio_rustls::{rustls::ServerConfig, TlsAcceptor};

/// Configuration for one [`HttpAdapter`] instance.
#[derive(Clone)]
pub struct HttpAdapterConfig {
    /// Interface to bind, e.g. `"0.0.0.0"`.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// How long [`HttpAdapter::serve`] waits for in-flight requests to
    /// finish after shutdown is signaled before returning anyway.
    pub shutdown_grace: std::time::Duration,
    /// Optional TLS configuration, supplied by the caller (`http-tls`
    /// feature). The core performs no certificate loading of its own.
    #[cfg(feature = "http-tls")]
    pub tls: Option<Arc<ServerConfig>>,
}

impl HttpAdapterConfig {
    /// An adapter bound to `host:port` with no TLS and a 30s shutdown grace.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            shutdown_grace: std::time::Duration::from_secs(30),
            #[cfg(feature = "http-tls")]
            tls: None,
        }
    }

    /// Override the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: std::time::Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Attach a caller-supplied TLS configuration.
    #[cfg(feature = "http-tls")]
    pub fn with_tls(mut self, tls: Arc<ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Failure modes surfaced by [`HttpAdapter::serve`] itself (as distinct
/// from a per-request [`crate::error::DispatchError`], which is translated
/// to an HTTP response rather than returned here).
#[derive(Debug)]
pub enum HttpAdapterError {
    /// Could not bind the listening socket.
    Bind(String),
    /// Failed to accept an inbound connection.
    Accept(String),
}

impl std::fmt::Display for HttpAdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpAdapterError::Bind(msg) => write!(f, "failed to bind HTTP listener: {msg}"),
            HttpAdapterError::Accept(msg) => write!(f, "failed to accept connection: {msg}"),
        }
    }
}

impl std::error::Error for HttpAdapterError {}

/// Drives registered HTTP handlers off inbound TCP connections.
pub struct HttpAdapter {
    config: HttpAdapterConfig,
    registry: Arc<Registry>,
    pool: Arc<ContextPool>,
    app: Option<Arc<AppAdapters>>,
    executor: Arc<Executor>,
}

impl HttpAdapter {
    /// Build an adapter over the given registry and context pool; `app`
    /// (if any) is attached to every acquired [`crate::context::Context`].
    pub fn new(
        config: HttpAdapterConfig,
        registry: Arc<Registry>,
        pool: Arc<ContextPool>,
        app: Option<Arc<AppAdapters>>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            config,
            registry,
            pool,
            app,
            executor,
        }
    }

    /// `host:port` this adapter binds.
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// `"https"` if TLS is configured, `"http"` otherwise.
    pub fn scheme(&self) -> &'static str {
        #[cfg(feature = "http-tls")]
        if self.config.tls.is_some() {
            return "https";
        }
        "http"
    }

    /// Bind and serve until `shutdown` fires, then stop accepting new
    /// connections, wait up to `shutdown_grace` for in-flight requests to
    /// finish, and return.
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), HttpAdapterError> {
        let listener = TcpListener::bind(self.address())
            .await
            .map_err(|e| HttpAdapterError::Bind(e.to_string()))?;
        tracing::info!(address = %self.address(), scheme = %self.scheme(), "HTTP adapter listening");

        let graceful = GracefulShutdown::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("HTTP adapter shutting down, draining in-flight connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, _peer) = accepted.map_err(|e| HttpAdapterError::Accept(e.to_string()))?;
                    let io = TokioIo::new(stream);
                    let this = Arc::clone(&self);

                    let conn = AutoBuilder::new(TokioExecutor::new()).serve_connection_with_upgrades(
                        io,
                        hyper::service::service_fn(move |req| {
                            let this = Arc::clone(&this);
                            async move { this.handle(req).await }
                        }),
                    );
                    let conn = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            tracing::debug!(error = %err, "HTTP connection ended with error");
                        }
                    });
                }
            }
        }

        match tokio::time::timeout(self.config.shutdown_grace, graceful.shutdown()).await {
            Ok(()) => tracing::info!("HTTP adapter drained all in-flight connections"),
            Err(_) => tracing::warn!("HTTP adapter shutdown grace period elapsed with connections still open"),
        }
        Ok(())
    }

    async fn handle(
        &self,
        req: HyperRequest<Incoming>,
    ) -> Result<HyperResponse<Full<Bytes>>, Infallible> {
        let method = req.method().as_str().to_ascii_uppercase();
        let path = req.uri().path().to_string();
        let query_params = parse_query(req.uri().query().unwrap_or(""));

        let header_pairs: Vec<(String, String)> = req
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes().to_vec(),
            Err(_) => Vec::new(),
        };

        let mut ctx = self.pool.acquire(self.app.clone(), TriggerKind::Http, CancellationToken::new());
        ctx.request.method = Some(method.clone());
        ctx.request.path = Some(path.clone());
        ctx.request.body = body;
        ctx.request.query_params = query_params;
        for (k, v) in header_pairs {
            ctx.request.headers.insert(k, v);
        }
        for cookie in parse_cookie_header(ctx.request.headers.get("cookie")) {
            ctx.request.cookies.insert(cookie.0, cookie.1);
        }

        let matched = self
            .registry
            .http_routes()
            .into_iter()
            .filter(|(m, _)| *m == method)
            .find_map(|(m, pattern)| match_path(&pattern, &path).map(|params| (m, pattern, params)));

        let response = match matched {
            None => {
                ctx.error(404, "not found");
                build_response(&ctx)
            }
            Some((m, pattern, params)) => {
                for (k, v) in params {
                    ctx.request.path_params.insert(k, v);
                }
                match self.registry.by_http(&m, &pattern) {
                    None => {
                        ctx.error(404, "not found");
                        build_response(&ctx)
                    }
                    Some(handler) => {
                        let refs = handler
                            .triggers()
                            .iter()
                            .find_map(|t| match t {
                                crate::trigger::Trigger::Http(h) if h.route_key() == (m.clone(), pattern.clone()) => {
                                    Some(h.middleware_refs.as_slice())
                                }
                                _ => None,
                            })
                            .map(|refs| self.registry.resolve_middleware_refs(refs))
                            .unwrap_or_default();
                        match self.executor.execute_with_refs(&handler, &mut ctx, &refs).await {
                            Ok(()) => build_response(&ctx),
                            Err(err) => {
                                let status = err.status_code();
                                ctx.error(status, &err.public_message());
                                build_response(&ctx)
                            }
                        }
                    }
                }
            }
        };

        Ok(response)
    }
}

fn build_response(ctx: &crate::context::Context) -> HyperResponse<Full<Bytes>> {
    let status = if ctx.response.status == 0 { 200 } else { ctx.response.status };
    let mut builder = HyperResponse::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    for (name, value) in ctx.response.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Full::new(Bytes::from(ctx.response.body.clone())))
        .unwrap_or_else(|_| {
            HyperResponse::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::new()))
                .expect("static response is always valid")
        })
}

/// Match `path` against a route `pattern` segment-by-segment. `:name` and
/// `{name}` segments are positional wildcards; every other
/// segment must compare equal. Returns the extracted path parameters on a
/// match.
fn match_path(pattern: &str, path: &str) -> Option<std::collections::HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = std::collections::HashMap::new();
    for (p, s) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            params.insert(name.to_string(), s.to_string());
        } else if p.starts_with('{') && p.ends_with('}') {
            params.insert(p[1..p.len() - 1].to_string(), s.to_string());
        } else if p != s {
            return None;
        }
    }
    Some(params)
}

fn parse_query(raw: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for pair in raw.split('&').filter(|s| !s.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        map.insert(key.to_string(), value.to_string());
    }
    map
}

fn parse_cookie_header(header: Option<&str>) -> Vec<(String, String)> {
    let Some(header) = header else { return Vec::new() };
    header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next()?.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_positional_colon_and_brace_segments() {
        let params = match_path("/hello/:name", "/hello/world").unwrap();
        assert_eq!(params.get("name"), Some(&"world".to_string()));

        let params = match_path("/items/{id}/edit", "/items/42/edit").unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn rejects_mismatched_static_segments_and_lengths() {
        assert!(match_path("/hello/:name", "/goodbye/world").is_none());
        assert!(match_path("/hello/:name", "/hello/world/extra").is_none());
    }

    #[test]
    fn query_string_parses_into_a_map() {
        let q = parse_query("a=1&b=two&flag");
        assert_eq!(q.get("a"), Some(&"1".to_string()));
        assert_eq!(q.get("b"), Some(&"two".to_string()));
        assert_eq!(q.get("flag"), Some(&"".to_string()));
    }

    #[test]
    fn cookie_header_parses_into_pairs() {
        let cookies = parse_cookie_header(Some("a=1; b=2"));
        assert_eq!(cookies, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        assert!(parse_cookie_header(None).is_empty());
    }
}
