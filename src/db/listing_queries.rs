use sqlx::PgPool;

use crate::models::listing::ListingRecord;

/// Look up a listing joined with its seller's verification flag
pub async fn get_listing(pool: &PgPool, item_id: i64) -> Result<Option<ListingRecord>, sqlx::Error> {
    sqlx::query_as::<_, ListingRecord>(
        r#"
        SELECT i.item_id, i.seller_id, i.name, i.description, i.category, i.images_qty,
               u.is_verified_seller
        FROM items i
        JOIN users u ON i.seller_id = u.seller_id
        WHERE i.item_id = $1
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await
}

/// Insert a seller, keeping the existing row on conflict
pub async fn create_user(
    pool: &PgPool,
    seller_id: i64,
    is_verified_seller: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (seller_id, is_verified_seller)
        VALUES ($1, $2)
        ON CONFLICT (seller_id) DO NOTHING
        "#,
    )
    .bind(seller_id)
    .bind(is_verified_seller)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a listing, keeping the existing row on conflict
pub async fn create_item(pool: &PgPool, listing: &ListingRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO items (item_id, seller_id, name, description, category, images_qty)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (item_id) DO NOTHING
        "#,
    )
    .bind(listing.item_id)
    .bind(listing.seller_id)
    .bind(&listing.name)
    .bind(&listing.description)
    .bind(listing.category)
    .bind(listing.images_qty)
    .execute(pool)
    .await?;

    Ok(())
}
