pub mod carts;
pub mod job_queue;
pub mod order_worker;
pub mod payment_intents;
pub mod reservations;
pub mod webhooks;
