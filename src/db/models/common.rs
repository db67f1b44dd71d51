//! Common types and utilities shared across models.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Minor units per major currency unit (cents, paise)
pub const MINOR_UNITS: i64 = 100;

/// Largest single amount accepted by the API, in minor units
pub const MAX_AMOUNT: i64 = 10_000_000 * MINOR_UNITS;

/// Convert a decimal amount from the API into minor units.
///
/// Rejects non-finite, non-positive and sub-minor-unit values instead of rounding them.
pub fn to_minor_units(amount: f64) -> Result<i64, String> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err("Amount must be greater than zero".to_string());
    }
    let scaled = amount * MINOR_UNITS as f64;
    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 {
        return Err("Amount can have at most two decimal places".to_string());
    }
    if rounded > MAX_AMOUNT as f64 {
        return Err("Amount exceeds the maximum allowed".to_string());
    }
    Ok(rounded as i64)
}

/// Convert minor units back to a decimal amount for display
pub fn to_major_units(minor: i64) -> f64 {
    minor as f64 / MINOR_UNITS as f64
}

/// Current time in the RFC 3339 format stored in every timestamp column
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Page/limit query parameters shared by list endpoints
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

impl Pagination {
    /// Clamp to sane bounds (page >= 1, 1 <= limit <= 100)
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.limit as i64
    }
}

/// A page of results with totals for the client pager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: Pagination, total: i64) -> Self {
        let limit = pagination.limit.max(1) as i64;
        Self {
            items,
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}
