use serde::{Deserialize, Serialize};

/// Listing attributes the classifier consumes, joined from `items` and
/// `users`. The service never writes these outside of seeding.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ListingRecord {
    pub item_id: i64,
    pub seller_id: i64,
    pub name: String,
    pub description: String,
    pub category: i32,
    pub images_qty: i32,
    pub is_verified_seller: bool,
}
