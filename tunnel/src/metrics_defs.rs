use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const TUNNEL_REJECTED: MetricDef = MetricDef {
    name: "tunnel.rejected",
    metric_type: MetricType::Counter,
    description: "Envelopes rejected before or during forwarding. Tagged with reason.",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Upstream forward duration in seconds. Tagged with status.",
};

pub const UPSTREAM_ERRORS: MetricDef = MetricDef {
    name: "upstream.errors",
    metric_type: MetricType::Counter,
    description: "Forwards that produced no upstream response. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    TUNNEL_REJECTED,
    UPSTREAM_DURATION,
    UPSTREAM_ERRORS,
];
