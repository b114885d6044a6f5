use metrics::{counter, histogram};

use crate::labels::LabelPolicy;

/// Metric names under: {ns}_router_*
pub struct RouterMetrics {
    ns: &'static str,
    policy: LabelPolicy,
}

impl RouterMetrics {
    pub fn new(namespace: &'static str, policy: LabelPolicy) -> Self {
        Self { ns: namespace, policy }
    }

    #[inline]
    pub fn rx_packet(&self) {
        counter!(format!("{}_router_rx_packets_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn forwarded(&self, fanout: usize) {
        counter!(format!("{}_router_forwarded_total", self.ns)).increment(1);
        histogram!(format!("{}_router_fanout", self.ns)).record(fanout as f64);
    }

    #[inline]
    pub fn drop_reason(&self, reason: &'static str) {
        counter!(
            format!("{}_router_drops_total", self.ns),
            "reason" => LabelPolicy::reason(reason).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn per_talkgroup_rx(&self, tg: u32) {
        counter!(
            format!("{}_router_rx_packets_by_talkgroup_total", self.ns),
            "tg" => self.policy.channel_bucket(tg).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn call_started(&self) {
        counter!(format!("{}_router_calls_started_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn call_ended(&self, duration_seconds: f64) {
        counter!(format!("{}_router_calls_ended_total", self.ns)).increment(1);
        histogram!(format!("{}_router_call_duration_seconds", self.ns)).record(duration_seconds);
    }

    #[inline]
    pub fn parrot_playback(&self) {
        counter!(format!("{}_router_parrot_playbacks_total", self.ns)).increment(1);
    }
}
