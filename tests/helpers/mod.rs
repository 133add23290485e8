//! Test helper utilities for E2E testing

use moderation_service::db::listing_queries;
use moderation_service::models::listing::ListingRecord;
use moderation_service::models::moderation::{AsyncPredictResponse, ModerationResultResponse};
use std::time::Duration;
use tokio::time::sleep;

use crate::fixtures::ListingFixture;

/// Insert the fixture's seller and listing (idempotent)
pub async fn seed_listing(
    pool: &sqlx::PgPool,
    fixture: &ListingFixture,
) -> Result<(), Box<dyn std::error::Error>> {
    listing_queries::create_user(pool, fixture.seller_id, fixture.is_verified_seller).await?;
    listing_queries::create_item(
        pool,
        &ListingRecord {
            item_id: fixture.item_id,
            seller_id: fixture.seller_id,
            name: fixture.name.to_string(),
            description: fixture.description.to_string(),
            category: fixture.category,
            images_qty: fixture.images_qty,
            is_verified_seller: fixture.is_verified_seller,
        },
    )
    .await?;
    Ok(())
}

/// Submit an item to POST /async_predict
pub async fn submit_item(
    client: &reqwest::Client,
    base_url: &str,
    item_id: i64,
) -> Result<AsyncPredictResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/async_predict", base_url))
        .json(&serde_json::json!({ "item_id": item_id }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<AsyncPredictResponse>().await?)
}

/// Poll GET /moderation_result/{task_id} until the task is terminal (with timeout)
pub async fn poll_task_result(
    client: &reqwest::Client,
    base_url: &str,
    task_id: i64,
    timeout_secs: u64,
) -> Result<ModerationResultResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/moderation_result/{}", base_url, task_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Result lookup failed: {}", error_text).into());
        }

        let result = response.json::<ModerationResultResponse>().await?;

        match result.status.as_str() {
            "completed" | "failed" => return Ok(result),
            "pending" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unknown task status: {}", other).into()),
        }
    }

    Err(format!("Task {} did not finish within {} seconds", task_id, timeout_secs).into())
}

/// Terminal-state invariant: exactly one of score or error is present
pub fn assert_terminal_invariant(result: &ModerationResultResponse) {
    match result.status.as_str() {
        "completed" => {
            assert!(result.is_violation.is_some(), "completed task without decision");
            let p = result.probability.expect("completed task without probability");
            assert!((0.0..=1.0).contains(&p), "probability out of range: {}", p);
            assert!(result.error_message.is_none());
        }
        "failed" => {
            assert!(result.error_message.is_some(), "failed task without error");
            assert!(result.is_violation.is_none() && result.probability.is_none());
        }
        other => panic!("task {} not terminal: {}", result.task_id, other),
    }
}
