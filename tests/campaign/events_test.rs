//! Tests for the append-only send event log.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use mailcast::campaign::events::{DeliveryStats, EventSink, SendEvent, SendEventType, SqliteEventLog};

async fn setup() -> (SqlitePool, SqliteEventLog) {
    let pool = match mailcast::db::open_in_memory().await {
        Ok(pool) => pool,
        Err(err) => panic!("in-memory database should open: {err}"),
    };
    (pool.clone(), SqliteEventLog::new(pool))
}

fn event(tenant: &str, campaign: &str, contact: &str, kind: SendEventType) -> SendEvent {
    SendEvent {
        campaign_id: campaign.to_owned(),
        tenant_id: tenant.to_owned(),
        contact_id: contact.to_owned(),
        event_type: kind,
        timestamp: Utc::now(),
        message_id: (kind == SendEventType::Sent).then(|| format!("msg-{contact}")),
        metadata: Some(json!({"channel": "primary", "attempts": 1})),
    }
}

#[tokio::test]
async fn appended_events_are_listed_in_order() {
    let (_pool, log) = setup().await;
    let first = event("t1", "c1", "a", SendEventType::Sent);
    let mut second = event("t1", "c1", "b", SendEventType::Failed);
    second.timestamp = first.timestamp + Duration::seconds(1);
    log.append(&first).await.expect("append");
    log.append(&second).await.expect("append");
    log.append(&event("t1", "c2", "a", SendEventType::Sent)).await.expect("append");

    let events = log.events_for_campaign("c1").await.expect("list");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].contact_id, "a");
    assert_eq!(events[0].message_id.as_deref(), Some("msg-a"));
    assert_eq!(events[0].metadata, first.metadata);
    assert_eq!(events[1].event_type, SendEventType::Failed);
    assert_eq!(
        events[1].timestamp.timestamp_millis(),
        second.timestamp.timestamp_millis()
    );
}

#[tokio::test]
async fn tenant_stats_count_by_type() {
    let (_pool, log) = setup().await;
    for (contact, kind) in [
        ("a", SendEventType::Sent),
        ("b", SendEventType::Sent),
        ("c", SendEventType::Sent),
        ("d", SendEventType::Failed),
    ] {
        log.append(&event("t1", "c1", contact, kind)).await.expect("append");
    }
    log.append(&event("t2", "c9", "z", SendEventType::Failed)).await.expect("append");

    assert_eq!(
        log.tenant_stats("t1").await.expect("stats"),
        DeliveryStats { sent: 3, failed: 1 }
    );
    assert_eq!(
        log.tenant_stats("t3").await.expect("stats"),
        DeliveryStats::default()
    );
}

#[tokio::test]
async fn events_cannot_be_updated_or_deleted() {
    let (pool, log) = setup().await;
    log.append(&event("t1", "c1", "a", SendEventType::Sent)).await.expect("append");

    let update = sqlx::query("UPDATE send_events SET type = 'failed'")
        .execute(&pool)
        .await;
    assert!(update.is_err(), "update should be rejected");

    let delete = sqlx::query("DELETE FROM send_events").execute(&pool).await;
    assert!(delete.is_err(), "delete should be rejected");

    assert_eq!(log.events_for_campaign("c1").await.expect("list").len(), 1);
}

#[test]
fn event_type_parsing() {
    assert_eq!(SendEventType::parse("sent").expect("sent"), SendEventType::Sent);
    assert_eq!(SendEventType::parse("failed").expect("failed"), SendEventType::Failed);
    assert!(SendEventType::parse("opened").is_err());
}
