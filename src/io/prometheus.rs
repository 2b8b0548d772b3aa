//! Prometheus metrics HTTP endpoint
//!
//! Exposes monitor metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_HAZARD_DIST_BOUNDS, METRICS_NUM_BUCKETS,
};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Text exposition builder; every sample carries the site label
struct Exposition<'a> {
    out: String,
    site: &'a str,
}

impl<'a> Exposition<'a> {
    fn new(site: &'a str) -> Self {
        Self { out: String::with_capacity(4096), site }
    }

    fn header(&mut self, name: &str, help: &str, typ: &str) {
        let _ = writeln!(self.out, "# HELP {name} {help}");
        let _ = writeln!(self.out, "# TYPE {name} {typ}");
    }

    fn sample(&mut self, name: &str, labels: &[(&str, &str)], val: impl std::fmt::Display) {
        let _ = write!(self.out, "{name}{{site=\"{}\"", self.site);
        for (key, value) in labels {
            let _ = write!(self.out, ",{key}=\"{value}\"");
        }
        let _ = writeln!(self.out, "}} {val}");
    }

    fn counter(&mut self, name: &str, help: &str, val: u64) {
        self.header(name, help, "counter");
        self.sample(name, &[], val);
    }

    fn gauge(&mut self, name: &str, help: &str, val: u64) {
        self.header(name, help, "gauge");
        self.sample(name, &[], val);
    }

    fn gauge_f64(&mut self, name: &str, help: &str, val: f64) {
        self.header(name, help, "gauge");
        self.sample(name, &[], format_args!("{val:.6}"));
    }

    /// Cumulative histogram from per-bucket counts; the last bucket is +Inf
    fn histogram(
        &mut self,
        name: &str,
        help: &str,
        buckets: &[u64; METRICS_NUM_BUCKETS],
        bounds: &[u64],
        sum: u64,
    ) {
        self.header(name, help, "histogram");
        let bucket_name = format!("{name}_bucket");
        let mut cumulative = 0u64;
        for (count, bound) in buckets.iter().zip(bounds) {
            cumulative += count;
            let le = bound.to_string();
            self.sample(&bucket_name, &[("le", le.as_str())], cumulative);
        }
        let total: u64 = buckets.iter().sum();
        self.sample(&bucket_name, &[("le", "+Inf")], total);
        self.sample(&format!("{name}_sum"), &[], sum);
        self.sample(&format!("{name}_count"), &[], total);
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut exp = Exposition::new(site_id);

    write_evaluation_metrics(&mut exp, &summary);
    write_transition_metrics(&mut exp, &summary);
    write_user_metrics(&mut exp, &summary);
    write_io_metrics(&mut exp, &summary);

    exp.finish()
}

fn write_evaluation_metrics(exp: &mut Exposition, s: &MetricsSummary) {
    exp.counter("safetrail_positions_total", "Total positions evaluated", s.positions_total);
    exp.gauge_f64(
        "safetrail_positions_per_sec",
        "Positions evaluated per second since last report",
        s.positions_per_sec,
    );
    exp.histogram(
        "safetrail_eval_latency_us",
        "Position evaluation latency in microseconds",
        &s.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        s.eval_latency_sum_us,
    );
    exp.gauge("safetrail_eval_latency_p99_us", "99th percentile evaluation latency", s.lat_p99_us);
    exp.counter(
        "safetrail_invalid_inputs_total",
        "Inputs rejected as invalid",
        s.invalid_inputs_total,
    );
    exp.histogram(
        "safetrail_nearest_hazard_m",
        "Distance from each evaluated position to the closest hazard zone center",
        &s.hazard_distance_buckets,
        &METRICS_HAZARD_DIST_BOUNDS,
        s.hazard_distance_sum_m,
    );
}

fn write_transition_metrics(exp: &mut Exposition, s: &MetricsSummary) {
    let name = "safetrail_transitions_total";
    exp.header(name, "Zone membership transitions", "counter");
    for (zone, kind, val) in [
        ("hazard", "entered", s.hazard_entries_total),
        ("hazard", "exited", s.hazard_exits_total),
        ("destination", "entered", s.destination_arrivals_total),
        ("destination", "exited", s.destination_departures_total),
    ] {
        exp.sample(name, &[("zone", zone), ("kind", kind)], val);
    }

    exp.counter(
        "safetrail_status_changes_total",
        "Safety status changes published",
        s.status_changes_total,
    );
    exp.counter("safetrail_panic_alerts_total", "Panic alerts raised", s.panic_alerts_total);
    exp.counter("safetrail_notifications_total", "Notifications sent", s.notifications_total);
    exp.counter(
        "safetrail_locations_forwarded_total",
        "Last-seen location updates forwarded",
        s.locations_forwarded_total,
    );
}

fn write_user_metrics(exp: &mut Exposition, s: &MetricsSummary) {
    exp.gauge("safetrail_active_users", "Users with carried evaluation state", s.active_users);
    exp.gauge("safetrail_unsafe_users", "Users whose last verdict was unsafe", s.unsafe_users);
    exp.gauge("safetrail_hazard_zones", "Zones in the current hazard snapshot", s.hazard_zones);
}

fn write_io_metrics(exp: &mut Exposition, s: &MetricsSummary) {
    exp.counter("safetrail_mqtt_messages_total", "MQTT messages received", s.mqtt_messages_total);
    exp.counter(
        "safetrail_mqtt_messages_invalid_total",
        "MQTT messages that failed to parse",
        s.mqtt_messages_invalid,
    );
    exp.counter(
        "safetrail_mqtt_events_dropped_total",
        "MQTT events dropped due to full channel",
        s.mqtt_events_dropped,
    );
    exp.counter(
        "safetrail_egress_dropped_total",
        "Egress messages dropped due to full channel",
        s.egress_dropped,
    );
    exp.counter(
        "safetrail_hazard_feed_refreshes_total",
        "Successful hazard feed refreshes",
        s.hazard_feed_refreshes,
    );
    exp.counter(
        "safetrail_hazard_feed_failures_total",
        "Failed hazard feed refreshes",
        s.hazard_feed_failures,
    );
    exp.gauge(
        "safetrail_event_queue_depth",
        "Current monitor event queue depth",
        s.event_queue_depth,
    );
}

/// Shared state for request handlers
struct ServerState {
    metrics: Arc<Metrics>,
    site_id: String,
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    debug!(method = %req.method(), path = %req.uri().path(), "prometheus_request");
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&state.metrics, &state.site_id),
        ),
        (&Method::GET, "/health") => {
            text_response(StatusCode::OK, "text/plain; charset=utf-8", "ok".to_string())
        }
        _ => text_response(
            StatusCode::NOT_FOUND,
            "text/plain; charset=utf-8",
            "Not Found".to_string(),
        ),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    let state = Arc::new(ServerState { metrics, site_id });

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle_request(req, state.clone()));
                    if let Err(e) =
                        http1::Builder::new().serve_connection(TokioIo::new(stream), service).await
                    {
                        error!(peer = %peer, error = %e, "prometheus_http_error");
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
