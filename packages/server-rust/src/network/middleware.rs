//! HTTP middleware stack for the opsguard server.
//!
//! Two pieces live here:
//! - [`ContextMiddleware`] builds a [`UserContext`] for each request, records
//!   its lifecycle, and stamps `X-Correlation-ID` on the response.
//! - [`build_http_layers`] composes the transport-level `tower-http` layers.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use http::{Request, Response, StatusCode};
use opsguard_core::{AppError, ContextManager, RequestData, UserContext};
use tower::{Layer, Service, ServiceBuilder};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::config::NetworkConfig;
use crate::observability::{CorrelationLogger, RequestLifecycleTracker};

/// Lifecycle status recorded when a request future is dropped before it
/// produced a response (client went away, server shutting down).
pub const CANCELLED_STATUS: u16 = 499;

/// Response (and inbound propagation) header carrying the correlation id.
pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");
const SESSION_ID_HEADER: HeaderName = HeaderName::from_static("x-session-id");
const FORWARDED_FOR_HEADER: HeaderName = HeaderName::from_static("x-forwarded-for");
const REAL_IP_HEADER: HeaderName = HeaderName::from_static("x-real-ip");

// ---------------------------------------------------------------------------
// ContextMiddleware
// ---------------------------------------------------------------------------

/// Request/response hooks binding a [`UserContext`] to the current thread.
///
/// `process_request*` builds the context and records a lifecycle start;
/// `process_response` echoes the correlation id, records the end, and
/// clears the context. With no active context `process_response` is a no-op.
///
/// With a logger attached, 5xx and 408 responses are logged as operational
/// errors under the request's correlation id.
#[derive(Debug, Clone)]
pub struct ContextMiddleware {
    tracker: Arc<RequestLifecycleTracker>,
    logger: Option<CorrelationLogger>,
}

impl ContextMiddleware {
    #[must_use]
    pub fn new(tracker: Arc<RequestLifecycleTracker>) -> Self {
        Self {
            tracker,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: CorrelationLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<RequestLifecycleTracker> {
        &self.tracker
    }

    /// Builds the context from already-extracted request fields.
    pub fn process_request_data(&self, data: RequestData) -> UserContext {
        let context = ContextManager::build_context(data);
        self.tracker
            .track_request_start(&context.correlation_id, context.sanitize_for_logging());
        context
    }

    /// Builds the context from HTTP request headers.
    pub fn process_request(&self, parts: &http::request::Parts) -> UserContext {
        self.process_request_data(request_data_from_headers(&parts.headers))
    }

    pub fn process_response<B>(&self, mut response: Response<B>) -> Response<B> {
        let Some(context) = ContextManager::get_context() else {
            return response;
        };

        match HeaderValue::from_str(&context.correlation_id) {
            Ok(value) => {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            Err(_) => warn!(
                correlation_id = %context.correlation_id,
                "correlation id is not a valid header value"
            ),
        }
        let status = response.status();
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            self.log_failure(
                &AppError::operational(format!("request failed with status {}", status.as_u16())),
                &context,
            );
        }
        self.tracker
            .track_request_end(&context.correlation_id, status.as_u16());
        ContextManager::clear_context();
        response
    }

    /// Closes out a request whose inner service returned an error instead of
    /// a response. Recorded as a 500.
    pub fn process_error(&self) {
        if let Some(context) = ContextManager::get_context() {
            self.log_failure(&AppError::operational("request handler failed"), &context);
            self.tracker.track_request_end(
                &context.correlation_id,
                StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            );
            ContextManager::clear_context();
        }
    }

    fn log_failure(&self, err: &AppError, context: &UserContext) {
        if let Some(logger) = &self.logger {
            logger.log_error_with_correlation(err, context, None);
        }
    }
}

/// Maps inbound headers onto [`RequestData`].
///
/// The client address is the first `X-Forwarded-For` entry, else `X-Real-IP`.
#[must_use]
pub fn request_data_from_headers(headers: &HeaderMap) -> RequestData {
    let header = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let ip_address = header(&FORWARDED_FOR_HEADER)
        .and_then(|list| {
            list.split(',')
                .next()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
        })
        .or_else(|| header(&REAL_IP_HEADER));

    RequestData {
        user_id: header(&USER_ID_HEADER),
        session_id: header(&SESSION_ID_HEADER),
        request_id: header(&REQUEST_ID_HEADER),
        correlation_id: header(&CORRELATION_ID_HEADER),
        ip_address,
        user_agent: header(&USER_AGENT),
        ..RequestData::default()
    }
}

// ---------------------------------------------------------------------------
// CorrelationLayer / CorrelationService
// ---------------------------------------------------------------------------

/// Tower layer that runs [`ContextMiddleware`] around every request.
#[derive(Debug, Clone)]
pub struct CorrelationLayer {
    middleware: ContextMiddleware,
}

impl CorrelationLayer {
    #[must_use]
    pub fn new(tracker: Arc<RequestLifecycleTracker>) -> Self {
        Self {
            middleware: ContextMiddleware::new(tracker),
        }
    }

    /// Logs failed requests through `logger` (and its analytics engine).
    #[must_use]
    pub fn with_logger(mut self, logger: CorrelationLogger) -> Self {
        self.middleware = self.middleware.with_logger(logger);
        self
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService {
            inner,
            middleware: self.middleware.clone(),
        }
    }
}

/// Service produced by [`CorrelationLayer`].
///
/// The request's context travels with the response future as a
/// [`ContextManager::scope`], so handlers see it through
/// [`ContextManager::get_context`] regardless of which worker polls them.
#[derive(Debug, Clone)]
pub struct CorrelationService<S> {
    inner: S,
    middleware: ContextMiddleware,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CorrelationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let (parts, body) = req.into_parts();

        // Build the request's context in clean slots, then hand the thread
        // back its previous state.
        let previous = ContextManager::detach();
        let context = self.middleware.process_request(&parts);
        let scoped = ContextManager::swap(previous);
        let mut pending = PendingEnd {
            tracker: Arc::clone(self.middleware.tracker()),
            correlation_id: Some(context.correlation_id),
        };

        // The clone that was driven to readiness must serve this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let middleware = self.middleware.clone();
        let request = Request::from_parts(parts, body);

        Box::pin(ContextManager::scope(scoped, async move {
            let result = inner.call(request).await;
            pending.disarm();
            match result {
                Ok(response) => Ok(middleware.process_response(response)),
                Err(err) => {
                    middleware.process_error();
                    Err(err)
                }
            }
        }))
    }
}

/// Records a [`CANCELLED_STATUS`] end event if the request future is dropped
/// before the inner service completes.
struct PendingEnd {
    tracker: Arc<RequestLifecycleTracker>,
    correlation_id: Option<String>,
}

impl PendingEnd {
    fn disarm(&mut self) {
        self.correlation_id = None;
    }
}

impl Drop for PendingEnd {
    fn drop(&mut self) {
        if let Some(correlation_id) = self.correlation_id.take() {
            debug!(correlation_id = %correlation_id, "request dropped before completion");
            self.tracker.track_request_end(&correlation_id, CANCELLED_STATUS);
        }
    }
}

// ---------------------------------------------------------------------------
// Transport layers
// ---------------------------------------------------------------------------

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    TimeoutLayer,
    tower::layer::util::Stack<
        CorrelationLayer,
        tower::layer::util::Stack<
            TraceLayer<
                tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
            >,
            tower::layer::util::Stack<
                PropagateRequestIdLayer,
                tower::layer::util::Stack<
                    SetRequestIdLayer<MakeRequestUuid>,
                    tower::layer::util::Identity,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP middleware stack.
///
/// **Ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` when absent
/// 2. `PropagateRequestId` -- copies `X-Request-Id` onto every response
/// 3. `Tracing` -- request/response trace spans
/// 4. [`CorrelationLayer`] -- request context, lifecycle events, `X-Correlation-ID`
/// 5. `Timeout` -- 408 once `request_timeout` elapses
///
/// The correlation layer sits inside `SetRequestId` so the generated request
/// id lands in the context, and outside `Timeout` so a 408 still carries the
/// correlation id and closes the lifecycle.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig, correlation: CorrelationLayer) -> HttpLayers {
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(TraceLayer::new_for_http())
        .layer(correlation)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .into_inner()
}
