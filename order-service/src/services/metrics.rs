//! Order workflow counters. Rendered through the shared Prometheus recorder
//! installed by `service_core::observability::init_metrics`.

use crate::models::OrderStatus;

pub fn record_order_created(items: usize) {
    metrics::counter!("orders_created_total").increment(1);
    metrics::histogram!("order_items_per_order").record(items as f64);
}

pub fn record_transition(from: OrderStatus, to: OrderStatus, source: &'static str) {
    metrics::counter!(
        "order_status_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str(),
        "source" => source
    )
    .increment(1);
}

pub fn record_restock(units: i64) {
    if units > 0 {
        metrics::counter!("orders_restocked_items_total").increment(units as u64);
    }
}

pub fn record_webhook_event(event_type: &str, outcome: &'static str) {
    metrics::counter!(
        "webhook_events_total",
        "event_type" => event_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_pending_purge(deleted: u64) {
    metrics::counter!("pending_orders_purged_total").increment(deleted);
}
