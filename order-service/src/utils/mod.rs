mod order_number;
mod validation;

pub use order_number::generate_order_number;
pub use validation::ValidatedJson;
