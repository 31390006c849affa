//! Implied payout multiples from pool amounts
//!
//! A side's implied multiple is what a unit stake would return if the pool
//! closed as-is: `total / side_pool`. Treasury fees are not deducted.

use crate::types::{wei_to_f64, Wei};
use serde::Serialize;

/// Implied multiples for both sides. `None` means the side's pool is empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImpliedMultiples {
    pub up: Option<f64>,
    pub down: Option<f64>,
}

/// Compute implied multiples for a pool.
///
/// An empty pool (`total == 0`) yields `0.0` for both sides rather than `None`;
/// downstream readers treat the two cases differently.
pub fn calculate_implied_multiples(total: Wei, bull: Wei, bear: Wei) -> ImpliedMultiples {
    if total.is_zero() {
        return ImpliedMultiples {
            up: Some(0.0),
            down: Some(0.0),
        };
    }

    let total_f = wei_to_f64(total);
    let side = |pool: Wei| {
        if pool.is_zero() {
            None
        } else {
            Some(total_f / wei_to_f64(pool))
        }
    };

    ImpliedMultiples {
        up: side(bull),
        down: side(bear),
    }
}
