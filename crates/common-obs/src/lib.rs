use std::{
    fmt, io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use tracing::{field::Visit, span};
use tracing_subscriber::{
    fmt::{self as tsfmt, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::{Context, Layer, SubscriberExt},
    registry::{LookupSpan, SpanRef},
    EnvFilter, Registry,
};

mod metrics;

pub use metrics::{
    encode_prometheus as encode_prometheus_metrics, http_requests_inflight, http_requests_total,
    register_counter, register_gauge, CounterVec, GaugeVec, PROMETHEUS_CONTENT_TYPE,
};

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize observability for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install a global tracing subscriber that writes JSON lines to stderr
    /// and register the service with the metrics facade.
    pub fn init(service: &str) -> Result<(), ObsInitError> {
        let subscriber = Self::subscriber_with_writer(service, io::stderr);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })
    }

    /// Build a tracing subscriber using the provided writer.
    pub fn subscriber_with_writer<W>(service: &str, writer: W) -> impl tracing::Subscriber
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        metrics::init(service);
        let env_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(env_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tsfmt::layer()
            .with_ansi(false)
            .event_format(JsonLineFormat {
                service: Arc::from(service),
            })
            .with_writer(writer);

        Registry::default()
            .with(env_filter)
            .with(TraceLayer)
            .with(fmt_layer)
    }
}

/// Health and info routes shared by every service. `version` is the calling
/// service's package version.
pub fn health_router(service: &'static str, version: &'static str) -> Router {
    let health = get(move || async move { Json(json!({ "status": "ok", "service": service })) });
    let info =
        get(move || async move { Json(json!({ "service": service, "version": version })) });

    Router::new()
        .route("/health", health.clone())
        .route("/v1/health", health)
        .route("/info", info.clone())
        .route("/v1/info", info)
}

/// Request scoped metadata carried on spans.
pub trait SpanExt {
    /// Record a request identifier on the span so that subsequent logs emit it.
    fn with_req(&self, request_id: &str);
}

impl SpanExt for tracing::Span {
    fn with_req(&self, request_id: &str) {
        if let Some(ctx) = trace_context(self) {
            ctx.set_request_id(request_id);
        }
    }
}

fn trace_context(span: &tracing::Span) -> Option<Arc<TraceContext>> {
    span.with_subscriber(|(id, dispatch)| {
        let registry = dispatch.downcast_ref::<Registry>()?;
        let data = registry.span(id)?;
        let ctx = data.extensions().get::<Arc<TraceContext>>().cloned();
        ctx
    })
    .flatten()
}

static TRACE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Assigns a trace context to every root span; children share their parent's.
struct TraceLayer;

impl<S> Layer<S> for TraceLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let inherited = span
            .parent()
            .and_then(|parent| parent.extensions().get::<Arc<TraceContext>>().cloned());
        let trace_ctx = inherited.unwrap_or_else(|| Arc::new(TraceContext::next()));
        span.extensions_mut().insert(trace_ctx);
    }
}

struct TraceContext {
    trace_id: String,
    request_id: RwLock<Option<String>>,
}

impl TraceContext {
    fn next() -> Self {
        let id = TRACE_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self {
            trace_id: format!("{id:016x}"),
            request_id: RwLock::new(None),
        }
    }

    fn request_id(&self) -> Option<String> {
        self.request_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_request_id(&self, value: &str) {
        *self
            .request_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(value.to_string());
    }
}

struct JsonLineFormat {
    service: Arc<str>,
}

impl<S, N> FormatEvent<S, N> for JsonLineFormat
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = FieldVisitor::default();
        event.record(&mut fields);

        let trace_ctx = ctx.lookup_current().and_then(find_trace_ctx);
        let trace_id = trace_ctx.as_ref().map(|ctx| ctx.trace_id.clone());
        let request_id = trace_ctx.as_ref().and_then(|ctx| ctx.request_id());

        let line = json!({
            "level": metadata.level().as_str().to_ascii_lowercase(),
            "target": metadata.target(),
            "service": &*self.service,
            "trace_id": trace_id,
            "request_id": request_id,
            "fields": Value::Object(fields.0),
        });
        writeln!(writer, "{line}")
    }
}

fn find_trace_ctx<S>(span: SpanRef<'_, S>) -> Option<Arc<TraceContext>>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    span.scope()
        .from_root()
        .find_map(|scoped| scoped.extensions().get::<Arc<TraceContext>>().cloned())
}

#[derive(Default)]
struct FieldVisitor(Map<String, Value>);

impl FieldVisitor {
    fn insert(&mut self, field: &tracing::field::Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.insert(field, Value::from(value));
    }
}
