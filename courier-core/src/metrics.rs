// ABOUTME: Metric recording helpers for delivery and identity resolution
// ABOUTME: Uses the metrics facade; installing an exporter is left to the binary

/// Queued messages, per transport
pub fn record_queued(transport: &str) {
    metrics::counter!("courier_delivery_queued_total", "transport" => transport.to_string())
        .increment(1);
}

pub fn record_sent(transport: &str) {
    metrics::counter!("courier_delivery_sent_total", "transport" => transport.to_string())
        .increment(1);
}

/// Queued messages given up on after a failed send
pub fn record_dropped(transport: &str) {
    metrics::counter!("courier_delivery_dropped_total", "transport" => transport.to_string())
        .increment(1);
}

/// Identity lookups by result: hit, resolved, unknown, error
pub fn record_identity_lookup(result: &'static str) {
    metrics::counter!("courier_identity_lookups_total", "result" => result).increment(1);
}
