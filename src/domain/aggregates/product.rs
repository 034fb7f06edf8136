//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{Sku, Money, Quantity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: Uuid,
    sku: Sku,
    name: String,
    description: String,
    price: Money,
    stock: Quantity,
    status: ProductStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// What checkout needs to know about a product: its current price and stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot { pub id: Uuid, pub sku: Sku, pub name: String, pub price: Money, pub stock: u32 }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus { #[default] Draft, Active, Archived }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Draft => "draft", Self::Active => "active", Self::Archived => "archived" }
    }

    pub fn parse(s: &str) -> Self {
        match s { "active" => Self::Active, "archived" => Self::Archived, _ => Self::Draft }
    }
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, price: Money) -> Result<Self, ProductError> {
        if !price.is_positive() { return Err(ProductError::InvalidPrice); }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), sku, name: name.into(), description: String::new(),
            price, stock: Quantity::default(), status: ProductStatus::Draft,
            created_at: now, updated_at: now,
        })
    }

    /// Rebuilds a product from its stored columns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(id: Uuid, sku: Sku, name: String, description: String, price: Money, stock: u32, status: ProductStatus, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self { id, sku, name, description, price, stock: Quantity::new(stock), status, created_at, updated_at }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn price(&self) -> &Money { &self.price }
    pub fn stock(&self) -> Quantity { self.stock }
    pub fn status(&self) -> ProductStatus { self.status }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot { id: self.id, sku: self.sku.clone(), name: self.name.clone(), price: self.price.clone(), stock: self.stock.value() }
    }

    pub fn describe(&mut self, description: impl Into<String>) { self.description = description.into(); self.touch(); }

    pub fn publish(&mut self) -> Result<(), ProductError> {
        if self.name.trim().is_empty() { return Err(ProductError::MissingName); }
        self.status = ProductStatus::Active;
        self.touch();
        Ok(())
    }

    pub fn add_stock(&mut self, qty: u32) { self.stock = self.stock.add(qty); self.touch(); }

    pub fn remove_stock(&mut self, qty: u32) -> Result<(), ProductError> {
        self.stock = self.stock.subtract(qty).ok_or(ProductError::InsufficientStock { requested: qty, available: self.stock.value() })?;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("Missing name")]
    MissingName,
    #[error("Price must be positive")]
    InvalidPrice,
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_product_create() {
        let p = Product::create(Sku::new("TEST-001").unwrap(), "Test Product", Money::new(1999, "NGN")).unwrap();
        assert_eq!(p.name(), "Test Product");
        assert_eq!(p.status(), ProductStatus::Draft);
        assert!(Product::create(Sku::new("FREE").unwrap(), "Free", Money::zero("NGN")).is_err());
    }
    #[test]
    fn test_stock() {
        let mut p = Product::create(Sku::new("TEST").unwrap(), "P", Money::new(10, "NGN")).unwrap();
        p.add_stock(10);
        assert!(!p.stock().is_zero());
        p.remove_stock(5).unwrap();
        assert_eq!(p.stock().value(), 5);
        assert_eq!(p.remove_stock(6), Err(ProductError::InsufficientStock { requested: 6, available: 5 }));
        assert_eq!(p.snapshot().stock, 5);
    }
}
