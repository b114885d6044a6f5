use dmr_metrics::GatewayMetrics;

pub fn gateway_metrics() -> GatewayMetrics {
    GatewayMetrics::new("dmr")
}
