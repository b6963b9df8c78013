pub mod booking;
pub mod booking_reservation;
pub mod cart;
pub mod cart_item;
pub mod job;
pub mod order;
pub mod order_item;
pub mod payment_intent;
pub mod product_variant;
pub mod webhook_event;
