//! Wishlist Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::product::ProductSnapshot;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wishlist {
    user_id: Uuid,
    items: Vec<WishlistItem>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistItem {
    pub product_id: Uuid,
    pub target_price: Option<Money>,
    pub notify_on_price_drop: bool,
    pub notify_on_restock: bool,
    pub added_at: DateTime<Utc>,
}

/// Wishlist entry settings supplied by the shopper.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistPreferences {
    pub target_price: Option<Money>,
    pub notify_on_price_drop: Option<bool>,
    pub notify_on_restock: Option<bool>,
}

impl WishlistItem {
    /// Whether the product's current state should alert the shopper.
    pub fn wants_alert(&self, product: &ProductSnapshot) -> bool {
        let price_hit = self.notify_on_price_drop
            && self.target_price.as_ref().is_some_and(|t| t.currency() == product.price.currency() && product.price.amount() <= t.amount());
        let restocked = self.notify_on_restock && product.stock > 0;
        price_hit || restocked
    }
}

impl Wishlist {
    pub fn for_user(user_id: Uuid) -> Self { Self { user_id, items: vec![], updated_at: Utc::now() } }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[WishlistItem] { &self.items }

    /// Adds a product, or merges the preferences into its existing entry.
    /// Adding the same product with the same preferences changes nothing.
    pub fn upsert(&mut self, product_id: Uuid, prefs: WishlistPreferences) {
        match self.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(existing) => {
                if let Some(target) = prefs.target_price { existing.target_price = Some(target); }
                if let Some(flag) = prefs.notify_on_price_drop { existing.notify_on_price_drop = flag; }
                if let Some(flag) = prefs.notify_on_restock { existing.notify_on_restock = flag; }
            }
            None => self.items.push(WishlistItem {
                product_id,
                target_price: prefs.target_price,
                notify_on_price_drop: prefs.notify_on_price_drop.unwrap_or(false),
                notify_on_restock: prefs.notify_on_restock.unwrap_or(false),
                added_at: Utc::now(),
            }),
        }
        self.updated_at = Utc::now();
    }

    pub fn remove(&mut self, product_id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        self.updated_at = Utc::now();
        self.items.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Sku;

    #[test]
    fn test_duplicate_adds_merge() {
        let product = Uuid::now_v7();
        let mut list = Wishlist::for_user(Uuid::now_v7());
        list.upsert(product, WishlistPreferences::default());
        list.upsert(product, WishlistPreferences { notify_on_restock: Some(true), ..Default::default() });
        assert_eq!(list.items().len(), 1);
        assert!(list.items()[0].notify_on_restock);
        assert!(list.remove(product));
        assert!(!list.remove(product));
    }

    #[test]
    fn test_price_drop_alert() {
        let product = ProductSnapshot { id: Uuid::now_v7(), sku: Sku::new("A").unwrap(), name: "A".into(), price: Money::new(900, "NGN"), stock: 0 };
        let mut list = Wishlist::for_user(Uuid::now_v7());
        list.upsert(product.id, WishlistPreferences { target_price: Some(Money::new(1000, "NGN")), notify_on_price_drop: Some(true), notify_on_restock: None });
        assert!(list.items()[0].wants_alert(&product));
        list.upsert(product.id, WishlistPreferences { target_price: Some(Money::new(800, "NGN")), ..Default::default() });
        assert!(!list.items()[0].wants_alert(&product));
    }
}
