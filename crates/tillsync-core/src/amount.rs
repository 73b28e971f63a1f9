//! # Amount Module
//!
//! Provides the `PaidAmount` type for the vendor's paid sum.
//!
//! ## Why a String?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Vendor sends:   "paid_amount": "1999.90"                               │
//! │  As f64:         1999.9 → written back as "1999.9"    ❌ content drift   │
//! │  As f64:         0.1 + 0.2 = 0.30000000000000004      ❌ wrong totals    │
//! │                                                                         │
//! │  OUR SOLUTION: keep the exact decimal text                              │
//! │    validated once at the boundary, compared and stored verbatim        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tillsync_core::amount::PaidAmount;
//!
//! let amount = PaidAmount::parse("250.00").unwrap();
//! assert_eq!(amount.as_str(), "250.00");
//!
//! assert!(PaidAmount::parse("2.5e2").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

// =============================================================================
// PaidAmount Type
// =============================================================================

/// A validated decimal amount kept in its original textual form.
///
/// ## Accepted Format
/// - optional leading `-` (refunds)
/// - one or more ASCII digits
/// - optionally `.` followed by one or more ASCII digits
///
/// Surrounding whitespace is trimmed; nothing else is normalized, so two
/// amounts are equal only when the vendor sent the same text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[serde(transparent)]
pub struct PaidAmount(String);

impl PaidAmount {
    /// Parses and validates a decimal amount.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::required("paid_amount"));
        }

        let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((int_part, frac_part)) => (int_part, Some(frac_part)),
            None => (unsigned, None),
        };

        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        if !all_digits(int_part) || frac_part.is_some_and(|f| !all_digits(f)) {
            return Err(ValidationError::invalid(
                "paid_amount",
                format!("expected a decimal number, got '{}'", trimmed),
            ));
        }

        Ok(PaidAmount(trimmed.to_string()))
    }

    /// Returns the amount exactly as received.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the amount, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PaidAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PaidAmount {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaidAmount::parse(s)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
