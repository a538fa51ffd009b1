pub mod cleanup;
pub mod metrics;
pub mod store;
pub mod stripe;
pub mod workflow;

pub use cleanup::spawn_cleanup_worker;
pub use store::{InMemoryOrderStore, OrderStore, PgOrderStore};
pub use stripe::StripeClient;
pub use workflow::{OrderWorkflow, StatusUpdateMode, WebhookOutcome};
