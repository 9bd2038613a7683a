use crate::error::PaymentError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Decimal places every stored amount is rounded to.
pub const MONEY_SCALE: u32 = 2;

/// Rounds to [`MONEY_SCALE`] places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A strictly positive monetary amount.
///
/// Deserialization goes through [`Amount::new`], so a stored or submitted
/// non-positive amount can never be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::Validation(format!(
                "amount must be greater than zero, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Amount in the provider's minor unit (cents), rounded half away from zero.
    pub fn minor_units(&self) -> Result<i64, PaymentError> {
        (self.0 * dec!(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or_else(|| PaymentError::Validation(format!("amount {} is too large", self.0)))
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Percentage added on top of the requested amount by a payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Surcharge(Decimal);

impl Surcharge {
    pub const NONE: Self = Self(Decimal::ZERO);

    pub fn new(percent: Decimal) -> Result<Self, PaymentError> {
        if percent < Decimal::ZERO || percent > dec!(100) {
            return Err(PaymentError::Validation(format!(
                "surcharge must be between 0 and 100 percent, got {percent}"
            )));
        }
        Ok(Self(percent))
    }

    pub fn percent(&self) -> Decimal {
        self.0
    }

    /// `amount + amount * percent / 100`, rounded to [`MONEY_SCALE`].
    pub fn apply(&self, amount: Amount) -> Amount {
        if self.0.is_zero() {
            return amount;
        }
        let charged = round_money(amount.0 + amount.0 * self.0 / dec!(100));
        // A non-negative surcharge on a positive amount stays positive.
        Amount(charged)
    }
}

impl TryFrom<Decimal> for Surcharge {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Surcharge> for Decimal {
    fn from(surcharge: Surcharge) -> Self {
        surcharge.0
    }
}
