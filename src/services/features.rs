use serde::Serialize;

use crate::models::listing::ListingRecord;

/// Number of features the classifier expects.
pub const FEATURE_COUNT: usize = 4;

const IMAGES_SCALE: f64 = 10.0;
const DESCRIPTION_SCALE: f64 = 1000.0;
const CATEGORY_SCALE: f64 = 100.0;

/// Normalised classifier input:
/// `[is_verified_seller, images_qty / 10, description_len / 1000, category / 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Map a listing onto the fixed feature layout.
///
/// Description length is counted in characters, not bytes, so Cyrillic and
/// other multi-byte text scores the same as its ASCII-length equivalent.
pub fn extract(listing: &ListingRecord) -> FeatureVector {
    let verified = if listing.is_verified_seller { 1.0 } else { 0.0 };
    let description_len = listing.description.chars().count() as f64;

    FeatureVector([
        verified,
        f64::from(listing.images_qty) / IMAGES_SCALE,
        description_len / DESCRIPTION_SCALE,
        f64::from(listing.category) / CATEGORY_SCALE,
    ])
}
