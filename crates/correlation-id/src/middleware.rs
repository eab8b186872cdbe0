//! Request boundary interceptor
//!
//! [`CorrelationIdLayer`] wraps any `tower::Service<http::Request<B>>`. For
//! every request it resolves a correlation ID from the configured header,
//! runs the downstream service inside a flow holding that ID, and appends
//! the ID to the response headers.
//!
//! Protocol upgrades (WebSocket handshakes, `CONNECT`) are passed through
//! untouched.
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use correlation_id::CorrelationIdLayer;
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "ok" }))
//!     .layer(CorrelationIdLayer::new());
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, CONNECTION, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::context::{self, FlowSnapshot};
use crate::error::{CorrelationError, Result};
use crate::resolver::{IdGenerator, IdResolver, IdSource, IdTransformer, IdValidator};
use crate::settings::{HttpSettings, DEFAULT_HEADER_NAME};
use crate::tracker::{self, detect_tracker, ErrorTracker, SharedTracker};

/// The resolved correlation ID, inserted into request extensions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct LayerConfig {
    header_name: HeaderName,
    /// Name as configured, used in `Access-Control-Expose-Headers`
    header_label: String,
    resolver: IdResolver,
    update_request_header: bool,
    expose_header: bool,
    tracker: SharedTracker,
}

/// Layer that attaches correlation IDs to requests and responses
#[derive(Clone)]
pub struct CorrelationIdLayer {
    config: Arc<LayerConfig>,
}

impl CorrelationIdLayer {
    /// Layer with every default: `X-Request-ID`, UUID4 validation, exposed header
    pub fn new() -> Self {
        Self {
            config: Arc::new(LayerConfig {
                header_name: HeaderName::from_static("x-request-id"),
                header_label: DEFAULT_HEADER_NAME.to_string(),
                resolver: IdResolver::default(),
                update_request_header: false,
                expose_header: true,
                tracker: detect_tracker(),
            }),
        }
    }

    pub fn builder() -> CorrelationIdLayerBuilder {
        CorrelationIdLayerBuilder::new()
    }

    /// Layer configured from [`HttpSettings`]
    pub fn from_settings(settings: &HttpSettings) -> Result<Self> {
        CorrelationIdLayerBuilder::from_settings(settings).build()
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.config.header_name
    }

    pub fn resolver(&self) -> &IdResolver {
        &self.config.resolver
    }
}

impl Default for CorrelationIdLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CorrelationIdLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationIdLayer")
            .field("header_name", &self.config.header_name)
            .field("resolver", &self.config.resolver)
            .field("update_request_header", &self.config.update_request_header)
            .field("expose_header", &self.config.expose_header)
            .finish()
    }
}

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Builder for [`CorrelationIdLayer`]
pub struct CorrelationIdLayerBuilder {
    header_name: String,
    resolver: IdResolver,
    update_request_header: bool,
    expose_header: bool,
    tracker: Option<SharedTracker>,
}

impl CorrelationIdLayerBuilder {
    pub fn new() -> Self {
        Self {
            header_name: DEFAULT_HEADER_NAME.to_string(),
            resolver: IdResolver::default(),
            update_request_header: false,
            expose_header: true,
            tracker: None,
        }
    }

    /// Builder seeded from [`HttpSettings`]
    pub fn from_settings(settings: &HttpSettings) -> Self {
        let builder = Self::new()
            .header_name(&settings.header_name)
            .update_request_header(settings.update_request_header)
            .expose_header(settings.expose_header);

        if settings.validate_uuid {
            builder
        } else {
            builder.without_validation()
        }
    }

    /// Set the header name (case-insensitive on the wire)
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.resolver = self.resolver.with_generator(generator);
        self
    }

    /// Replace the default UUID4 validator
    pub fn validator(mut self, validator: impl IdValidator + 'static) -> Self {
        self.resolver = self.resolver.with_validator(validator);
        self
    }

    pub fn add_validator(mut self, validator: impl IdValidator + 'static) -> Self {
        self.resolver = self.resolver.add_validator(validator);
        self
    }

    /// Accept any non-empty header value
    pub fn without_validation(mut self) -> Self {
        self.resolver = self.resolver.without_validation();
        self
    }

    pub fn transformer(mut self, transformer: impl IdTransformer + 'static) -> Self {
        self.resolver = self.resolver.with_transformer(transformer);
        self
    }

    /// Use a fully configured resolver
    pub fn resolver(mut self, resolver: IdResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn update_request_header(mut self, enabled: bool) -> Self {
        self.update_request_header = enabled;
        self
    }

    pub fn expose_header(mut self, enabled: bool) -> Self {
        self.expose_header = enabled;
        self
    }

    /// Override tracker detection
    pub fn tracker(mut self, tracker: impl ErrorTracker + 'static) -> Self {
        self.tracker = Some(SharedTracker::new(tracker));
        self
    }

    pub fn build(self) -> Result<CorrelationIdLayer> {
        let header_name = HeaderName::from_bytes(self.header_name.as_bytes())
            .map_err(|e| CorrelationError::invalid_header_name(&self.header_name, e))?;

        Ok(CorrelationIdLayer {
            config: Arc::new(LayerConfig {
                header_name,
                header_label: self.header_name,
                resolver: self.resolver,
                update_request_header: self.update_request_header,
                expose_header: self.expose_header,
                tracker: self.tracker.unwrap_or_else(detect_tracker),
            }),
        })
    }
}

impl Default for CorrelationIdLayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Service produced by [`CorrelationIdLayer`]
#[derive(Clone)]
pub struct CorrelationIdService<S> {
    inner: S,
    config: Arc<LayerConfig>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CorrelationIdService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if is_upgrade(&req) {
            return self.inner.call(req).boxed();
        }

        let config = Arc::clone(&self.config);
        let inbound = req
            .headers()
            .get(&config.header_name)
            .and_then(|value| value.to_str().ok());
        let resolution = config.resolver.resolve(inbound);

        match &resolution.source {
            IdSource::Regenerated { .. } => warn!(
                target: "correlation_id",
                "Generated new request ID ({}), since request header value failed validation",
                resolution.id
            ),
            IdSource::Generated => debug!(
                correlation_id = %resolution.id,
                "No request ID header found, generated a new one"
            ),
            IdSource::Header => {}
        }

        let id = resolution.id;
        let header_value = match HeaderValue::from_str(&id) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(
                    target: "correlation_id",
                    correlation_id = %id,
                    header = %config.header_label,
                    "Correlation ID is not a valid header value, skipping header"
                );
                None
            }
        };

        if config.update_request_header {
            if let Some(value) = &header_value {
                req.headers_mut()
                    .insert(config.header_name.clone(), value.clone());
            }
        }
        req.extensions_mut().insert(CorrelationId(id.clone()));

        let snapshot = FlowSnapshot::correlated(id.clone());
        let fut = context::sync_scope_with(snapshot.clone(), || self.inner.call(req));

        let flow = context::scope_with(snapshot, async move {
            config.tracker.tag(&id);

            let mut response = fut.await?;

            if let Some(value) = header_value {
                let headers = response.headers_mut();
                headers.append(config.header_name.clone(), value);
                if config.expose_header {
                    expose_header(headers, &config.header_label);
                }
            }

            Ok(response)
        });

        tracker::bind_flow_hub(flow).boxed()
    }
}

/// True for requests that switch protocols instead of completing a response
fn is_upgrade<B>(req: &Request<B>) -> bool {
    if req.method() == Method::CONNECT {
        return true;
    }

    let connection_upgrade = req
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade && req.headers().contains_key(UPGRADE)
}

/// Add `name` to `Access-Control-Expose-Headers` as its own value.
///
/// Existing values are left as they are, including ones that are not UTF-8.
fn expose_header(headers: &mut HeaderMap, name: &str) {
    let already_exposed = headers
        .get_all(ACCESS_CONTROL_EXPOSE_HEADERS)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(name));

    if already_exposed {
        return;
    }

    if let Ok(value) = HeaderValue::from_str(name) {
        headers.append(ACCESS_CONTROL_EXPOSE_HEADERS, value);
    }
}
