use metrics::{counter, histogram};

/// Metric names under: {ns}_gateway_*
pub struct GatewayMetrics {
    ns: &'static str,
}

impl GatewayMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    pub fn repeater_connected(&self) {
        counter!(format!("{}_gateway_repeaters_connected_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn repeater_disconnected(&self) {
        counter!(format!("{}_gateway_repeaters_disconnected_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn auth_success(&self) {
        counter!(format!("{}_gateway_auth_success_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn auth_failed(&self) {
        counter!(format!("{}_gateway_auth_failed_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn command_rx(&self, kind: &'static str) {
        counter!(format!("{}_gateway_command_rx_total", self.ns), "kind" => kind).increment(1);
    }

    #[inline]
    pub fn command_rejected(&self, kind: &'static str) {
        counter!(format!("{}_gateway_command_rejected_total", self.ns), "kind" => kind).increment(1);
    }

    #[inline]
    pub fn keepalive_sweep_expired(&self, count: usize) {
        counter!(format!("{}_gateway_keepalive_expired_total", self.ns)).increment(count as u64);
    }

    #[inline]
    pub fn login_seconds(&self, seconds: f64) {
        histogram!(format!("{}_gateway_login_seconds", self.ns)).record(seconds);
    }
}
