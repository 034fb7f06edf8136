//! Cart Aggregate
//!
//! One cart per user, at most one line per product. Prices are not kept
//! here; they are read from the catalog when the order is placed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_LINE_QUANTITY: u32 = 999;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    user_id: Uuid,
    items: Vec<CartItem>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl Cart {
    pub fn for_user(user_id: Uuid) -> Self {
        Self { user_id, items: vec![], updated_at: Utc::now() }
    }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn quantity_of(&self, product_id: Uuid) -> Option<u32> {
        self.items.iter().find(|i| i.product_id == product_id).map(|i| i.quantity)
    }

    /// Adds `quantity` of a product, merging into the existing line if there is one.
    pub fn add_item(&mut self, product_id: Uuid, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 { return Err(CartError::InvalidQuantity); }
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            let merged = existing.quantity.saturating_add(quantity);
            if merged > MAX_LINE_QUANTITY { return Err(CartError::InvalidQuantity); }
            existing.quantity = merged;
        } else {
            if quantity > MAX_LINE_QUANTITY { return Err(CartError::InvalidQuantity); }
            self.items.push(CartItem { product_id, quantity, added_at: Utc::now() });
        }
        self.touch();
        Ok(())
    }

    pub fn update_quantity(&mut self, product_id: Uuid, quantity: u32) -> Result<(), CartError> {
        if quantity > MAX_LINE_QUANTITY { return Err(CartError::InvalidQuantity); }
        let item = self.items.iter_mut().find(|i| i.product_id == product_id).ok_or(CartError::ItemNotFound)?;
        if quantity == 0 { self.items.retain(|i| i.product_id != product_id); }
        else { item.quantity = quantity; }
        self.touch();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, InvalidQuantity }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found"),
            Self::InvalidQuantity => write!(f, "Quantity must be between 1 and {}", MAX_LINE_QUANTITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_cart_operations() {
        let product = Uuid::now_v7();
        let mut cart = Cart::for_user(Uuid::now_v7());
        cart.add_item(product, 2).unwrap();
        assert_eq!(cart.item_count(), 1);
        cart.add_item(product, 1).unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.quantity_of(product), Some(3)); // Merged
        cart.update_quantity(product, 0).unwrap();
        assert!(cart.is_empty());
    }
    #[test]
    fn test_cart_rejects_bad_quantities() {
        let mut cart = Cart::for_user(Uuid::now_v7());
        assert_eq!(cart.add_item(Uuid::now_v7(), 0), Err(CartError::InvalidQuantity));
        assert_eq!(cart.remove_item(Uuid::now_v7()), Err(CartError::ItemNotFound));
        let product = Uuid::now_v7();
        cart.add_item(product, MAX_LINE_QUANTITY).unwrap();
        assert_eq!(cart.add_item(product, 1), Err(CartError::InvalidQuantity));
    }
}
