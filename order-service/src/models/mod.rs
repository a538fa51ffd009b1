mod order;
mod product;
mod profile;

pub use order::{
    NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, PaymentStatus, TransitionDecision,
    TransitionOrigin,
};
pub use product::{Product, ProductStatus};
pub use profile::{Profile, Role};
