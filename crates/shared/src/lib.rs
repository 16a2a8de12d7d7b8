// Shared crate clippy configuration
#![allow(clippy::too_many_arguments)] // Row constructors mirror table columns
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CallAlly shared types
//!
//! Domain models, the tenant store and its backends, pagination and the
//! advisory rate limiter used by the API and billing crates.

pub mod db;
pub mod error;
pub mod models;
pub mod pagination;
pub mod rate_limit;
pub mod store;

pub use db::{create_pool, run_migrations};
pub use error::{StoreError, StoreResult};
pub use models::{
    Appointment, AppointmentStatus, Business, BusinessHours, BusinessStatus, Call, CallDirection,
    CallRoutingMode, CallStatus, Integration, Plan, SmsMessage, UsageRecord, User,
};
pub use pagination::{Page, PageError, Paginated};
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use store::{
    BusinessStats, CallReport, MemoryTenantStore, NewAppointment, NewSmsMessage, PgTenantStore,
    ReconciledCall, StatsWindow, TenantStore,
};
