use metrics::histogram;

pub struct StoreMetrics {
    ns: &'static str,
}

impl StoreMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn query_seconds(&self, query: &'static str, seconds: f64) {
        histogram!(format!("{}_store_query_seconds", self.ns), "query" => query).record(seconds);
    }
}
