use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240201_000001_create_product_variants_table::Migration),
            Box::new(m20240201_000002_create_carts_tables::Migration),
            Box::new(m20240201_000003_create_booking_reservations_table::Migration),
            Box::new(m20240201_000004_create_payment_intents_table::Migration),
            Box::new(m20240201_000005_create_webhook_events_table::Migration),
            Box::new(m20240201_000006_create_jobs_table::Migration),
            Box::new(m20240201_000007_create_orders_tables::Migration),
            Box::new(m20240201_000008_create_bookings_table::Migration),
        ]
    }
}

mod m20240201_000001_create_product_variants_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000001_create_product_variants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::Sku).string().not_null())
                        .col(ColumnDef::new(ProductVariants::Name).string().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::PriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Available)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_sku")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::Sku)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ProductVariants {
        Table,
        Id,
        Sku,
        Name,
        PriceMinor,
        Available,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240201_000002_create_carts_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000002_create_carts_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Carts::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Carts::Status).string().not_null())
                        .col(ColumnDef::new(Carts::Currency).string().not_null())
                        .col(ColumnDef::new(Carts::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Carts::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_carts_customer_id")
                        .table(Carts::Table)
                        .col(Carts::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::VariantId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::UnitPriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CartItems::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_cart_id")
                        .table(CartItems::Table)
                        .col(CartItems::CartId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        CustomerId,
        Status,
        Currency,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        CartId,
        VariantId,
        Quantity,
        UnitPriceMinor,
        CreatedAt,
    }
}

mod m20240201_000003_create_booking_reservations_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000003_create_booking_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(BookingReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BookingReservations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BookingReservations::CartId).uuid().not_null())
                        .col(
                            ColumnDef::new(BookingReservations::ServiceId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookingReservations::StylistId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookingReservations::StartsAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookingReservations::EndsAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookingReservations::Status)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookingReservations::ExpiresAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookingReservations::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BookingReservations::UpdatedAt)
                                .timestamp()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_booking_reservations_cart_id")
                        .table(BookingReservations::Table)
                        .col(BookingReservations::CartId)
                        .to_owned(),
                )
                .await?;

            // The sweeper scans by status + deadline
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_booking_reservations_status_expires_at")
                        .table(BookingReservations::Table)
                        .col(BookingReservations::Status)
                        .col(BookingReservations::ExpiresAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BookingReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum BookingReservations {
        Table,
        Id,
        CartId,
        ServiceId,
        StylistId,
        StartsAt,
        EndsAt,
        Status,
        ExpiresAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240201_000004_create_payment_intents_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000004_create_payment_intents_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentIntents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentIntents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(PaymentIntents::CartId).uuid().not_null())
                        .col(ColumnDef::new(PaymentIntents::Provider).string().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::Currency).string().not_null())
                        .col(ColumnDef::new(PaymentIntents::Status).string().not_null())
                        .col(ColumnDef::new(PaymentIntents::ProviderRef).string().null())
                        .col(
                            ColumnDef::new(PaymentIntents::ShippingAddress)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_intents_customer_id")
                        .table(PaymentIntents::Table)
                        .col(PaymentIntents::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_intents_status")
                        .table(PaymentIntents::Table)
                        .col(PaymentIntents::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentIntents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentIntents {
        Table,
        Id,
        CustomerId,
        CartId,
        Provider,
        AmountMinor,
        Currency,
        Status,
        ProviderRef,
        ShippingAddress,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240201_000005_create_webhook_events_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000005_create_webhook_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WebhookEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WebhookEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookEvents::Provider).string().not_null())
                        .col(ColumnDef::new(WebhookEvents::EventId).string().not_null())
                        .col(ColumnDef::new(WebhookEvents::Payload).json().not_null())
                        .col(ColumnDef::new(WebhookEvents::Outcome).json().not_null())
                        .col(
                            ColumnDef::new(WebhookEvents::ReceivedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WebhookEvents::ProcessedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            // The idempotency guarantee: one row per provider-issued event id.
            // Must be a real unique index so it survives restarts and races.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_webhook_events_provider_event_id")
                        .table(WebhookEvents::Table)
                        .col(WebhookEvents::Provider)
                        .col(WebhookEvents::EventId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WebhookEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WebhookEvents {
        Table,
        Id,
        Provider,
        EventId,
        Payload,
        Outcome,
        ReceivedAt,
        ProcessedAt,
    }
}

mod m20240201_000006_create_jobs_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000006_create_jobs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Jobs::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Jobs::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Jobs::JobType).string().not_null())
                        .col(ColumnDef::new(Jobs::Payload).json().not_null())
                        .col(ColumnDef::new(Jobs::Status).string().not_null())
                        .col(ColumnDef::new(Jobs::LeaseOwner).string().null())
                        .col(ColumnDef::new(Jobs::LeaseExpiresAt).timestamp().null())
                        .col(ColumnDef::new(Jobs::NotBefore).timestamp().null())
                        .col(
                            ColumnDef::new(Jobs::AttemptCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Jobs::MaxAttempts).integer().not_null())
                        .col(ColumnDef::new(Jobs::LastError).string().null())
                        .col(ColumnDef::new(Jobs::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Jobs::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            // Acquire scans oldest-first over queued/stale-leased rows
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_jobs_status_created_at")
                        .table(Jobs::Table)
                        .col(Jobs::Status)
                        .col(Jobs::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Jobs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Jobs {
        Table,
        Id,
        JobType,
        Payload,
        Status,
        LeaseOwner,
        LeaseExpiresAt,
        NotBefore,
        AttemptCount,
        MaxAttempts,
        LastError,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240201_000007_create_orders_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000007_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentIntentId).uuid().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(
                            ColumnDef::new(Orders::SubtotalMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingFeeMinor)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountMinor)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::TotalMinor).big_integer().not_null())
                        .col(ColumnDef::new(Orders::Currency).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).json().not_null())
                        .col(ColumnDef::new(Orders::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp().null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // At most one order per payment intent, enforced by the store
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_payment_intent_id")
                        .table(Orders::Table)
                        .col(Orders::PaymentIntentId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_customer_id")
                        .table(Orders::Table)
                        .col(Orders::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::VariantId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Sku).string().not_null())
                        .col(ColumnDef::new(OrderItems::Name).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::UnitPriceMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::TotalMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::FulfillmentStatus)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        PaymentIntentId,
        CustomerId,
        Status,
        SubtotalMinor,
        ShippingFeeMinor,
        DiscountMinor,
        TotalMinor,
        Currency,
        ShippingAddress,
        CreatedAt,
        UpdatedAt,
        Version,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        VariantId,
        Sku,
        Name,
        Quantity,
        UnitPriceMinor,
        TotalMinor,
        FulfillmentStatus,
        CreatedAt,
    }
}

mod m20240201_000008_create_bookings_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240201_000008_create_bookings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Bookings::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Bookings::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Bookings::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Bookings::ServiceId).uuid().not_null())
                        .col(ColumnDef::new(Bookings::StylistId).uuid().not_null())
                        .col(ColumnDef::new(Bookings::StartsAt).timestamp().not_null())
                        .col(ColumnDef::new(Bookings::EndsAt).timestamp().not_null())
                        .col(ColumnDef::new(Bookings::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bookings_order_id")
                        .table(Bookings::Table)
                        .col(Bookings::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bookings_stylist_id_starts_at")
                        .table(Bookings::Table)
                        .col(Bookings::StylistId)
                        .col(Bookings::StartsAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Bookings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Bookings {
        Table,
        Id,
        OrderId,
        ServiceId,
        StylistId,
        StartsAt,
        EndsAt,
        CreatedAt,
    }
}
