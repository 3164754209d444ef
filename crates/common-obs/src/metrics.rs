use once_cell::sync::{Lazy, OnceCell};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);
static SERVICE_NAME: OnceCell<&'static str> = OnceCell::new();
static PROCESS_START: OnceCell<Instant> = OnceCell::new();

static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter(
        "http_requests_total",
        "Total HTTP requests handled",
        &["service", "route", "code"],
    )
});
static HTTP_REQUESTS_INFLIGHT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge(
        "http_requests_inflight",
        "Current in-flight HTTP requests",
        &["service"],
    )
});

/// Remember the service name and start the uptime clock. Later calls are ignored.
pub fn init(service: &str) {
    PROCESS_START.get_or_init(Instant::now);
    if SERVICE_NAME.get().is_some() {
        return;
    }
    let leaked: &'static str = Box::leak(service.to_string().into_boxed_str());
    if SERVICE_NAME.set(leaked).is_ok() {
        http_requests_inflight().ensure(&[leaked]);
    }
}

pub fn service_name() -> Option<&'static str> {
    SERVICE_NAME.get().copied()
}

pub fn http_requests_total() -> &'static CounterVec {
    &HTTP_REQUESTS_TOTAL
}

pub fn http_requests_inflight() -> &'static GaugeVec {
    &HTTP_REQUESTS_INFLIGHT
}

/// Register a counter family, or return the existing one with the same name.
pub fn register_counter(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> CounterVec {
    let mut families = REGISTRY.write();
    for family in families.iter() {
        if let Family::Counter(existing) = family {
            if existing.0.name == name {
                return existing.clone();
            }
        }
    }
    let counter = CounterVec(Arc::new(Series::new(name, help, label_names)));
    families.push(Family::Counter(counter.clone()));
    counter
}

/// Register a gauge family, or return the existing one with the same name.
pub fn register_gauge(
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
) -> GaugeVec {
    let mut families = REGISTRY.write();
    for family in families.iter() {
        if let Family::Gauge(existing) = family {
            if existing.0.name == name {
                return existing.clone();
            }
        }
    }
    let gauge = GaugeVec(Arc::new(Series::new(name, help, label_names)));
    families.push(Family::Gauge(gauge.clone()));
    gauge
}

/// Render every registered family plus process uptime in Prometheus text format.
pub fn encode_prometheus() -> String {
    let mut output = String::new();
    let uptime = PROCESS_START
        .get_or_init(Instant::now)
        .elapsed()
        .as_secs_f64();

    let _ = writeln!(output, "# HELP process_uptime_seconds Service uptime in seconds");
    let _ = writeln!(output, "# TYPE process_uptime_seconds gauge");
    match service_name() {
        Some(service) => {
            let _ = writeln!(
                output,
                "process_uptime_seconds{{service=\"{}\"}} {uptime:.3}",
                escape_label(service)
            );
        }
        None => {
            let _ = writeln!(output, "process_uptime_seconds {uptime:.3}");
        }
    }

    for family in REGISTRY.read().iter() {
        match family {
            Family::Counter(counter) => counter.0.encode(&mut output, "counter"),
            Family::Gauge(gauge) => gauge.0.encode(&mut output, "gauge"),
        }
    }
    output
}

#[derive(Default)]
struct Registry {
    families: RwLock<Vec<Family>>,
}

impl Registry {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Family>> {
        self.families.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Family>> {
        self.families.write().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Family {
    Counter(CounterVec),
    Gauge(GaugeVec),
}

/// One metric family: a set of values keyed by label values.
struct Series<V> {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: Mutex<BTreeMap<Vec<String>, Arc<V>>>,
}

trait SampleValue: Default {
    fn render(&self) -> String;
}

impl SampleValue for AtomicU64 {
    fn render(&self) -> String {
        self.load(Ordering::Relaxed).to_string()
    }
}

impl SampleValue for AtomicI64 {
    fn render(&self) -> String {
        self.load(Ordering::Relaxed).to_string()
    }
}

impl<V: SampleValue> Series<V> {
    fn new(
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            label_names,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    fn slot(&self, labels: &[&str]) -> Arc<V> {
        let key: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.entry(key).or_default().clone()
    }

    fn encode(&self, output: &mut String, kind: &str) {
        let _ = writeln!(output, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(output, "# TYPE {} {}", self.name, kind);
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        for (labels, value) in values.iter() {
            output.push_str(self.name);
            write_labels(output, self.label_names, labels);
            let _ = writeln!(output, " {}", value.render());
        }
    }
}

fn write_labels(output: &mut String, names: &[&str], values: &[String]) {
    if names.is_empty() {
        return;
    }
    output.push('{');
    for (idx, (name, value)) in names.iter().zip(values).enumerate() {
        if idx > 0 {
            output.push(',');
        }
        let _ = write!(output, "{name}=\"{}\"", escape_label(value));
    }
    output.push('}');
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Monotonic counter keyed by label values.
#[derive(Clone)]
pub struct CounterVec(Arc<Series<AtomicU64>>);

impl CounterVec {
    pub fn inc(&self, labels: &[&str], amount: u64) {
        self.0.slot(labels).fetch_add(amount, Ordering::Relaxed);
    }

    /// Make the series visible at zero before the first increment.
    pub fn ensure(&self, labels: &[&str]) {
        self.0.slot(labels);
    }
}

/// Up/down gauge keyed by label values.
#[derive(Clone)]
pub struct GaugeVec(Arc<Series<AtomicI64>>);

impl GaugeVec {
    pub fn add(&self, labels: &[&str], delta: i64) {
        self.0.slot(labels).fetch_add(delta, Ordering::Relaxed);
    }

    pub fn ensure(&self, labels: &[&str]) {
        self.0.slot(labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_with_labels() {
        let counter = register_counter("test_events_total", "Test events", &["kind"]);
        counter.inc(&["a"], 2);
        counter.inc(&["b\"q"], 1);

        let encoded = encode_prometheus();
        assert!(encoded.contains("# TYPE test_events_total counter"));
        assert!(encoded.contains("test_events_total{kind=\"a\"} 2"));
        assert!(encoded.contains("test_events_total{kind=\"b\\\"q\"} 1"));
        assert!(encoded.contains("process_uptime_seconds"));
    }

    #[test]
    fn registering_twice_returns_same_family() {
        let first = register_counter("test_shared_total", "Shared", &["k"]);
        let second = register_counter("test_shared_total", "Shared", &["k"]);
        first.inc(&["x"], 3);
        second.inc(&["x"], 1);
        assert!(encode_prometheus().contains("test_shared_total{k=\"x\"} 4"));
    }

    #[test]
    fn gauges_move_both_ways() {
        let gauge = register_gauge("test_level", "Test level", &[]);
        gauge.add(&[], 5);
        gauge.add(&[], -2);

        let encoded = encode_prometheus();
        assert!(encoded.contains("# TYPE test_level gauge"));
        assert!(encoded.contains("test_level 3"));
    }

    #[test]
    fn ensured_series_render_at_zero() {
        let counter = register_counter("test_untouched_total", "Untouched", &["k"]);
        counter.ensure(&["seen"]);
        assert!(encode_prometheus().contains("test_untouched_total{k=\"seen\"} 0"));
    }
}
