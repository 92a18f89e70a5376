//! Per-container policy overrides, the ignored-version list, and the
//! maintenance-window gate consulted by the scheduler on every tick.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use dockwarden_core::error::Result;
use dockwarden_core::store::{buckets, Store, StoreExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Auto,
    Manual,
    Pinned,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Auto
    }
}

pub async fn policy_for<S: Store + ?Sized>(store: &S, container_name: &str) -> Result<Policy> {
    Ok(store
        .get::<Policy>(buckets::POLICY_OVERRIDES, container_name)
        .await?
        .unwrap_or_default())
}

pub async fn ignored_versions<S: Store + ?Sized>(
    store: &S,
    container_name: &str,
) -> Result<Vec<String>> {
    Ok(store
        .get::<Vec<String>>(buckets::IGNORED_VERSIONS, container_name)
        .await?
        .unwrap_or_default())
}

/// An hour-of-day window (UTC), e.g. 02:00-04:00, during which `policy=auto`
/// updates are allowed to apply automatically. A window whose `start_hour`
/// equals `end_hour` is treated as "always open" (a 24h window is meaningless
/// otherwise).
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl MaintenanceWindow {
    pub fn always_open() -> Self {
        Self {
            start_hour: 0,
            end_hour: 0,
        }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if self.start_hour == self.end_hour {
            return true;
        }
        let hour = now.hour();
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Window wraps past midnight, e.g. 22:00-04:00.
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn policy_defaults_to_auto_when_unset() {
        let store = dockwarden_core::store::SqlitePersistence::in_memory().await.unwrap();
        assert_eq!(policy_for(&store, "web").await.unwrap(), Policy::Auto);
    }

    #[test]
    fn window_within_same_day_range() {
        let window = MaintenanceWindow { start_hour: 2, end_hour: 4 };
        let inside = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        assert!(window.contains(inside));
        assert!(!window.contains(outside));
    }

    #[test]
    fn window_wraps_past_midnight() {
        let window = MaintenanceWindow { start_hour: 22, end_hour: 4 };
        let late_night = Utc.with_ymd_and_hms(2026, 1, 1, 23, 0, 0).unwrap();
        let early_morning = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert!(window.contains(late_night));
        assert!(window.contains(early_morning));
        assert!(!window.contains(midday));
    }

    #[test]
    fn always_open_window_contains_every_hour() {
        let window = MaintenanceWindow::always_open();
        assert!(window.contains(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2026, 1, 1, 13, 0, 0).unwrap()));
    }
}
