use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pasal API",
        description = "Order fulfillment pipeline and booking-slot reservations"
    ),
    paths(
        crate::handlers::payment_intents::create_payment_intent,
        crate::handlers::webhooks::fulfill_order_webhook,
        crate::handlers::orders::check_order_status,
        crate::handlers::worker::drain_order_worker,
        crate::handlers::worker::acquire_job,
        crate::handlers::worker::list_dead_jobs,
        crate::handlers::carts::create_cart,
        crate::handlers::carts::add_cart_item,
        crate::handlers::carts::get_cart,
        crate::handlers::reservations::hold_slot,
        crate::handlers::reservations::renew_reservation,
        crate::handlers::reservations::release_reservation,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::payments::PaymentMethod,
        crate::services::payment_intents::CreateIntentInput,
        crate::services::payment_intents::CreateIntentOutcome,
        crate::services::payment_intents::OrderStatusView,
        crate::services::webhooks::WebhookPayload,
        crate::services::webhooks::WebhookResponse,
        crate::services::order_worker::JobOutcome,
        crate::handlers::worker::DrainResponse,
        crate::handlers::worker::AcquireJobRequest,
        crate::handlers::worker::AcquireJobResponse,
        crate::handlers::worker::DeadJobsResponse,
        crate::handlers::carts::CreateCartRequest,
        crate::handlers::carts::AddItemRequest,
    )),
    tags(
        (name = "Checkout", description = "Payment intent creation"),
        (name = "Webhooks", description = "Provider callback ingestion"),
        (name = "Worker", description = "Privileged queue and worker operations"),
        (name = "Orders", description = "Order status lookups"),
        (name = "Carts", description = "Cart store"),
        (name = "Reservations", description = "Booking-slot reservations"),
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at /docs
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
