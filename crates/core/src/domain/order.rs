use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn line_amount(&self) -> Result<Decimal, DomainError> {
        self.unit_price.checked_mul(Decimal::from(self.quantity)).ok_or_else(|| {
            DomainError::InvalidOrder(format!(
                "line amount for product {} is out of range",
                self.product_id
            ))
        })
    }
}

/// An order that reached the completed state and feeds the behavior profiles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub completed_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl CompletedOrder {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id.0.trim().is_empty() {
            return Err(DomainError::InvalidOrder("user id is required".to_owned()));
        }
        if self.lines.is_empty() {
            return Err(DomainError::InvalidOrder(format!(
                "order {} has no line items",
                self.order_id.0
            )));
        }

        let mut seen = HashSet::with_capacity(self.lines.len());
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(DomainError::InvalidOrder(format!(
                    "line for product {} has zero quantity",
                    line.product_id
                )));
            }
            if line.unit_price.is_sign_negative() {
                return Err(DomainError::InvalidOrder(format!(
                    "line for product {} has a negative unit price",
                    line.product_id
                )));
            }
            line.line_amount()?;
            if !seen.insert(&line.product_id) {
                return Err(DomainError::InvalidOrder(format!(
                    "product {} appears more than once",
                    line.product_id
                )));
            }
        }

        Ok(())
    }
}
