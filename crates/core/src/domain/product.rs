use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(pub String);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized catalog category, e.g. `bebidas` or `comida_rapida`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidCategory(raw.to_owned()));
        }

        let mut normalized = String::with_capacity(trimmed.len());
        for ch in trimmed.chars() {
            match ch {
                'a'..='z' | '0'..='9' | '_' => normalized.push(ch),
                'A'..='Z' => normalized.push(ch.to_ascii_lowercase()),
                ' ' | '-' => normalized.push('_'),
                _ => return Err(DomainError::InvalidCategory(raw.to_owned())),
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Category {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}

/// Catalog entry as seen by the recommendation pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub image_ref: Option<String>,
    pub category: Category,
    pub store_id: StoreId,
    pub store_name: String,
    pub available: bool,
}
