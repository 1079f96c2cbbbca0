//! # Domain Collaborator Interfaces
//!
//! Narrow capability contracts for the domain services the scheduler
//! consumes when computing dynamic schedules. The engine treats all of
//! them as opaque: failures come back as `anyhow` errors and are handled
//! at the call site per the degradation policy of the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event lifecycle states the scheduler transitions through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Ended,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upcoming => write!(f, "upcoming"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// An event with a scheduled start and end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub target_audience: Vec<String>,
}

/// A coupon still redeemable at lookup time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCoupon {
    pub id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// One user holding a coupon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponHolder {
    pub user_id: String,
}

/// Audience-wide announcement for an event about to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventNotification {
    pub event_id: String,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub audience: Vec<String>,
}

/// Direct notification to a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub body: String,
}

/// Read and transition events.
#[async_trait]
pub trait EventsService: Send + Sync {
    async fn upcoming_events(&self) -> anyhow::Result<Vec<UpcomingEvent>>;

    async fn update_event_status(&self, event_id: &str, status: EventStatus)
        -> anyhow::Result<()>;
}

/// Read coupons and their holders.
#[async_trait]
pub trait CouponsService: Send + Sync {
    async fn active_coupons(&self) -> anyhow::Result<Vec<ActiveCoupon>>;

    async fn coupon_holders(&self, coupon_id: &str) -> anyhow::Result<Vec<CouponHolder>>;
}

/// Deliver notifications.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send_event_notification(&self, notification: EventNotification)
        -> anyhow::Result<()>;

    async fn send_notification(&self, notification: Notification) -> anyhow::Result<()>;
}
