use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};

/// `ORD-<unix millis>-<6 uppercase alphanumerics>`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();

    format!("ORD-{}-{}", now.timestamp_millis(), suffix)
}
