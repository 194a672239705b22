//! POS daily availability reset.
//!
//! Sold-out flags are per business day. A business day starts at the store's
//! end-of-day cutoff hour (local time), so a login at 01:30 still belongs to
//! the previous day when the cutoff is 03:00.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::api::handlers::auth::storage::AccountStore;

pub const DEFAULT_EOD_CUTOFF_HOUR: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DailyReset {
    AlreadyDone { business_date: NaiveDate },
    Applied { business_date: NaiveDate, cleared: u64 },
}

/// Business date for `now` in the store's time zone, given its cutoff hour.
#[must_use]
pub fn business_date(now: DateTime<Utc>, timezone: Tz, cutoff_hour: i32) -> NaiveDate {
    (now.with_timezone(&timezone) - Duration::hours(i64::from(cutoff_hour))).date_naive()
}

/// Clear the store's availability once per business day (or always with `force`).
///
/// # Errors
/// Returns an error if the store cannot be read or updated.
pub async fn run(
    accounts: &dyn AccountStore,
    store_id: i64,
    timezone: Tz,
    cutoff_hour: i32,
    now: DateTime<Utc>,
    force: bool,
) -> Result<DailyReset> {
    let business_date = business_date(now, timezone, cutoff_hour);

    if !force && accounts.last_daily_reset(store_id).await? == Some(business_date) {
        debug!(store_id, %business_date, "Daily reset already applied");
        return Ok(DailyReset::AlreadyDone { business_date });
    }

    let cleared = accounts.apply_daily_reset(store_id, business_date).await?;
    info!(store_id, %business_date, cleared, "Daily availability reset applied");
    Ok(DailyReset::Applied {
        business_date,
        cleared,
    })
}
