mod migrations;

use crate::db::*;
use crate::types::JobId;

/// Insert a pending job with the given priority
pub(super) async fn insert(db: &Database, url: &str, priority: i32) -> JobId {
    db.insert_job(&NewJob {
        source_ref: url.to_string(),
        owner_channel: "owner-1".to_string(),
        title: None,
        priority,
    })
    .await
    .unwrap()
}
