//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod wishlist;
pub mod payment;

pub use product::{Product, ProductError, ProductSnapshot, ProductStatus};
pub use order::{Discount, FulfillmentStatus, LineItem, Order, OrderError, OrderStatus};
pub use cart::{Cart, CartError, CartItem};
pub use wishlist::{Wishlist, WishlistItem, WishlistPreferences};
pub use payment::{
    AttemptMetadata, Payment, PaymentError, PaymentMethod, PaymentPolicy, PaymentStatus, ReferenceId, Refund, RefundDenial,
    RefundStatus,
};
