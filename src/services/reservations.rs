//! Booking-slot reservation lifecycle.
//!
//! A reservation is a time-boxed soft lock on a stylist's calendar slot:
//! `held` until it is confirmed by order fulfillment, released by the
//! customer, or expired by the sweeper. Confirmation happens inside the
//! order worker's transaction via [`confirm_cart_reservations`].

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::booking::{self, Entity as BookingEntity};
use crate::entities::booking_reservation::{
    self, Entity as ReservationEntity, ReservationStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Result of sweeping expired reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResult {
    /// Number of reservations flipped to expired.
    pub expired_count: u64,
    /// Timestamp when the sweep ran.
    pub cleaned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldSlotInput {
    pub cart_id: Uuid,
    pub service_id: Uuid,
    pub stylist_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Service for managing booking-slot reservations.
#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    hold_ttl: Duration,
}

impl ReservationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, hold_ttl_secs: u64) -> Self {
        Self {
            db,
            event_sender,
            hold_ttl: Duration::seconds(hold_ttl_secs as i64),
        }
    }

    /// Places a hold on a slot. Fails with Conflict when the slot overlaps an
    /// unexpired hold or an existing confirmed booking for the same stylist.
    #[instrument(skip(self, input), fields(cart_id = %input.cart_id, stylist_id = %input.stylist_id))]
    pub async fn hold_slot(
        &self,
        input: HoldSlotInput,
    ) -> Result<booking_reservation::Model, ServiceError> {
        if input.ends_at <= input.starts_at {
            return Err(ServiceError::ValidationError(
                "Slot end must be after start".to_string(),
            ));
        }

        let now = Utc::now();

        let competing_hold = ReservationEntity::find()
            .filter(booking_reservation::Column::StylistId.eq(input.stylist_id))
            .filter(booking_reservation::Column::Status.eq(ReservationStatus::Held.as_str()))
            .filter(booking_reservation::Column::ExpiresAt.gt(now))
            .filter(booking_reservation::Column::StartsAt.lt(input.ends_at))
            .filter(booking_reservation::Column::EndsAt.gt(input.starts_at))
            .one(&*self.db)
            .await?;
        if competing_hold.is_some() {
            return Err(ServiceError::Conflict(
                "Slot is currently held by another customer".to_string(),
            ));
        }

        let booked = BookingEntity::find()
            .filter(booking::Column::StylistId.eq(input.stylist_id))
            .filter(booking::Column::StartsAt.lt(input.ends_at))
            .filter(booking::Column::EndsAt.gt(input.starts_at))
            .one(&*self.db)
            .await?;
        if booked.is_some() {
            return Err(ServiceError::Conflict("Slot is already booked".to_string()));
        }

        let model = booking_reservation::ActiveModel {
            cart_id: Set(input.cart_id),
            service_id: Set(input.service_id),
            stylist_id: Set(input.stylist_id),
            starts_at: Set(input.starts_at),
            ends_at: Set(input.ends_at),
            status: Set(ReservationStatus::Held.as_str().to_string()),
            expires_at: Set(now + self.hold_ttl),
            ..Default::default()
        };
        let created = model.insert(&*self.db).await?;

        info!(reservation_id = %created.id, "held booking slot");
        let _ = self
            .event_sender
            .send(Event::ReservationHeld {
                reservation_id: created.id,
                cart_id: created.cart_id,
            })
            .await;

        Ok(created)
    }

    /// Extends the hold deadline, e.g. while the customer edits their
    /// appointment. Only an unexpired `held` reservation can be renewed.
    #[instrument(skip(self))]
    pub async fn renew(
        &self,
        reservation_id: Uuid,
    ) -> Result<booking_reservation::Model, ServiceError> {
        let reservation = self.require_reservation(reservation_id).await?;
        let now = Utc::now();

        self.guard_held(&reservation, now).await?;

        let mut active: booking_reservation::ActiveModel = reservation.into();
        active.expires_at = Set(now + self.hold_ttl);
        let updated = active.update(&*self.db).await?;

        let _ = self
            .event_sender
            .send(Event::ReservationRenewed(reservation_id))
            .await;

        Ok(updated)
    }

    /// Explicit customer cancellation ("change appointment").
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        reservation_id: Uuid,
    ) -> Result<booking_reservation::Model, ServiceError> {
        let reservation = self.require_reservation(reservation_id).await?;
        let now = Utc::now();

        self.guard_held(&reservation, now).await?;

        let mut active: booking_reservation::ActiveModel = reservation.into();
        active.status = Set(ReservationStatus::Released.as_str().to_string());
        let updated = active.update(&*self.db).await?;

        info!(reservation_id = %reservation_id, "released reservation");
        let _ = self
            .event_sender
            .send(Event::ReservationReleased(reservation_id))
            .await;

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<booking_reservation::Model>, ServiceError> {
        Ok(ReservationEntity::find_by_id(reservation_id)
            .one(&*self.db)
            .await?)
    }

    /// Marks all overdue `held` reservations as expired. Runs periodically
    /// from the background sweeper.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_reservations(&self) -> Result<CleanupResult, ServiceError> {
        let now = Utc::now();

        let overdue = ReservationEntity::find()
            .filter(booking_reservation::Column::Status.eq(ReservationStatus::Held.as_str()))
            .filter(booking_reservation::Column::ExpiresAt.lt(now))
            .all(&*self.db)
            .await?;

        let mut expired_count = 0u64;
        for reservation in overdue {
            let reservation_id = reservation.id;
            let mut active: booking_reservation::ActiveModel = reservation.into();
            active.status = Set(ReservationStatus::Expired.as_str().to_string());

            match active.update(&*self.db).await {
                Ok(_) => {
                    expired_count += 1;
                    let _ = self
                        .event_sender
                        .send(Event::ReservationExpired(reservation_id))
                        .await;
                }
                Err(e) => {
                    warn!(
                        reservation_id = %reservation_id,
                        error = %e,
                        "failed to mark reservation as expired"
                    );
                }
            }
        }

        if expired_count > 0 {
            info!(expired_count, "expired overdue reservations");
        }

        Ok(CleanupResult {
            expired_count,
            cleaned_at: now,
        })
    }

    async fn require_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<booking_reservation::Model, ServiceError> {
        ReservationEntity::find_by_id(reservation_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Reservation {} not found", reservation_id))
            })
    }

    /// Enforces the transition guard: only an unexpired `held` reservation
    /// may change state. A past-deadline `held` row is flipped to expired
    /// before the error is returned, so lookups observe the true state.
    async fn guard_held(
        &self,
        reservation: &booking_reservation::Model,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        match ReservationStatus::from_str(&reservation.status) {
            Some(ReservationStatus::Held) => {
                if reservation.is_expired(now) {
                    let mut active: booking_reservation::ActiveModel = reservation.clone().into();
                    active.status = Set(ReservationStatus::Expired.as_str().to_string());
                    active.update(&*self.db).await?;
                    let _ = self
                        .event_sender
                        .send(Event::ReservationExpired(reservation.id))
                        .await;
                    return Err(ServiceError::ReservationExpired(reservation.id.to_string()));
                }
                Ok(())
            }
            _ => Err(ServiceError::ReservationExpired(reservation.id.to_string())),
        }
    }
}

/// Flips every overdue `held` reservation on a cart to `expired`. Called
/// outside the fulfillment transaction after a confirmation aborts, so
/// lookups observe the true state instead of a stale hold.
pub async fn expire_overdue_cart_reservations<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    let result = ReservationEntity::update_many()
        .col_expr(
            booking_reservation::Column::Status,
            sea_orm::sea_query::Expr::value(ReservationStatus::Expired.as_str()),
        )
        .col_expr(
            booking_reservation::Column::UpdatedAt,
            sea_orm::sea_query::Expr::value(Some(now)),
        )
        .filter(booking_reservation::Column::CartId.eq(cart_id))
        .filter(booking_reservation::Column::Status.eq(ReservationStatus::Held.as_str()))
        .filter(booking_reservation::Column::ExpiresAt.lt(now))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Confirms every `held` reservation on a cart, inside the caller's
/// transaction, and materializes the permanent bookings. Any reservation
/// past its deadline (or already terminal) aborts the whole confirmation.
pub async fn confirm_cart_reservations<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<booking::Model>, ServiceError> {
    let reservations = ReservationEntity::find()
        .filter(booking_reservation::Column::CartId.eq(cart_id))
        .filter(
            booking_reservation::Column::Status.ne(ReservationStatus::Released.as_str()),
        )
        .all(conn)
        .await?;

    let mut bookings = Vec::with_capacity(reservations.len());
    for reservation in reservations {
        match ReservationStatus::from_str(&reservation.status) {
            Some(ReservationStatus::Held) if !reservation.is_expired(now) => {}
            _ => {
                return Err(ServiceError::ReservationExpired(
                    reservation.id.to_string(),
                ));
            }
        }

        let mut active: booking_reservation::ActiveModel = reservation.clone().into();
        active.status = Set(ReservationStatus::Confirmed.as_str().to_string());
        active.update(conn).await?;

        let created = booking::ActiveModel {
            order_id: Set(order_id),
            service_id: Set(reservation.service_id),
            stylist_id: Set(reservation.stylist_id),
            starts_at: Set(reservation.starts_at),
            ends_at: Set(reservation.ends_at),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        bookings.push(created);
    }

    Ok(bookings)
}
