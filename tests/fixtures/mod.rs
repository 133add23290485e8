//! Listings seeded for E2E testing

/// Listing seeded into `users` / `items` before the E2E run
#[derive(Debug, Clone)]
pub struct ListingFixture {
    pub item_id: i64,
    pub seller_id: i64,
    pub is_verified_seller: bool,
    pub name: &'static str,
    pub description: &'static str,
    pub category: i32,
    pub images_qty: i32,
    /// Expected decision under the baseline model
    pub expect_violation: bool,
}

pub const LISTING_FIXTURES: &[ListingFixture] = &[
    ListingFixture {
        item_id: 900_042,
        seller_id: 900_001,
        is_verified_seller: false,
        name: "Phone",
        description: "Short description",
        category: 1,
        images_qty: 0,
        expect_violation: true,
    },
    ListingFixture {
        item_id: 900_043,
        seller_id: 900_002,
        is_verified_seller: true,
        name: "Bicycle",
        description: "Long description with details about frame size, gears and service history",
        category: 50,
        images_qty: 5,
        expect_violation: false,
    },
];

/// Item id guaranteed not to be seeded
pub const MISSING_ITEM_ID: i64 = 999_999_999;
