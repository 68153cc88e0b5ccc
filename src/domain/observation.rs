//! Per-product listing rows and discount recovery.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// One product row read from a listing page.
///
/// Prices are in minor currency units (kopecks), as the marketplace reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductObservation {
    pub product_id: u64,
    /// 1-based listing page the row was read from.
    pub page: u32,
    pub price_u: u64,
    pub sale_price_u: u64,
    /// Seller's base discount, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_sale: Option<i64>,
    /// Price after the base discount, before the client discount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_price_u: Option<u64>,
    /// Client discount (SPP) as displayed, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_sale: Option<i64>,
}

impl ProductObservation {
    /// Recover this product's individual client discount percentage.
    ///
    /// Prefers the displayed client discount; falls back to comparing the
    /// final price with the price after the base discount. Returns `None`
    /// when neither is available. The result is not bounds-checked.
    pub fn discount_percent(&self) -> Option<i64> {
        if let Some(client_sale) = self.client_sale {
            return Some(client_sale);
        }

        let basic_price_u = self.basic_price_u.or_else(|| self.price_after_basic_sale())?;
        if basic_price_u == 0 {
            return None;
        }

        let ratio = Decimal::from(self.sale_price_u) / Decimal::from(basic_price_u);
        let percent = (Decimal::ONE - ratio) * Decimal::ONE_HUNDRED;
        percent
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }

    fn price_after_basic_sale(&self) -> Option<u64> {
        let basic_sale = self.basic_sale?;
        let factor = (Decimal::ONE_HUNDRED - Decimal::from(basic_sale)) / Decimal::ONE_HUNDRED;
        (Decimal::from(self.price_u) * factor)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
    }
}
