// tests/memory_store_test.rs

mod test_helpers;

use test_helpers::{MockOracle, create_test_character, setup_services};
use uuid::Uuid;

use elara::error::Error;
use elara::identity::SYSTEM_USER_ID;

#[tokio::test]
async fn test_insert_dedupes_active_content() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1001", None).await.unwrap();

    let first = services
        .memories
        .insert(&character.id, Some(&user), "personal_info", "name", "Имя пользователя: Аня", 8)
        .await
        .unwrap();

    for _ in 0..4 {
        let next = services
            .memories
            .insert(&character.id, Some(&user), "personal_info", "name", "Имя пользователя: Аня", 8)
            .await
            .unwrap();
        assert_eq!(next, first, "duplicate insert must return the existing id");
    }

    let entries = services.memories.query(&character.id, Some(&user), 50).await.unwrap();
    let matching: Vec<_> =
        entries.iter().filter(|e| e.content == "Имя пользователя: Аня").collect();
    assert_eq!(matching.len(), 1, "exactly one active entry per content");
}

#[tokio::test]
async fn test_empty_content_is_invalid() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;

    let err = services
        .memories
        .insert(&character.id, None, "fact", "general", "   ", 5)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_unknown_user_reassigned_to_system() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let ghost = Uuid::new_v4();

    services
        .memories
        .insert(&character.id, Some(&ghost), "fact", "general", "Любит зелёный чай", 5)
        .await
        .unwrap();

    let entries = services.memories.query(&character.id, None, 50).await.unwrap();
    let entry = entries.iter().find(|e| e.content == "Любит зелёный чай").unwrap();
    assert_eq!(entry.user_id, SYSTEM_USER_ID);
}

#[tokio::test]
async fn test_defaults_and_importance_clamping() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1002", None).await.unwrap();

    services
        .memories
        .insert(&character.id, Some(&user), "", "", "Факт без типа", 99)
        .await
        .unwrap();

    let entries = services.memories.query(&character.id, Some(&user), 50).await.unwrap();
    let entry = entries.iter().find(|e| e.content == "Факт без типа").unwrap();
    assert_eq!(entry.memory_type, "unknown");
    assert_eq!(entry.category, "general");
    assert_eq!(entry.importance, 10);
}

#[tokio::test]
async fn test_query_orders_by_importance_then_recency() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1003", None).await.unwrap();

    for (content, importance) in
        [("мелочь", 2), ("важное", 9), ("среднее", 5)]
    {
        services
            .memories
            .insert(&character.id, Some(&user), "fact", "general", content, importance)
            .await
            .unwrap();
    }

    let entries = services.memories.query(&character.id, Some(&user), 10).await.unwrap();
    let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["важное", "среднее", "мелочь"]);
}

#[tokio::test]
async fn test_query_merges_system_tier() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1004", None).await.unwrap();

    services
        .memories
        .insert(&character.id, Some(&user), "fact", "general", "факт пользователя", 5)
        .await
        .unwrap();
    services
        .memories
        .insert(&character.id, None, "fact", "general", "системный факт", 5)
        .await
        .unwrap();

    let entries = services.memories.query(&character.id, Some(&user), 10).await.unwrap();
    let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
    assert!(contents.contains(&"факт пользователя"));
    assert!(contents.contains(&"системный факт"));
}

#[tokio::test]
async fn test_deactivate_hides_entry_and_allows_reinsert() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1005", None).await.unwrap();

    let id = services
        .memories
        .insert(&character.id, Some(&user), "fact", "general", "устаревший факт", 5)
        .await
        .unwrap();
    services.memories.deactivate(&id).await.unwrap();

    let entries = services.memories.query(&character.id, Some(&user), 50).await.unwrap();
    assert!(entries.iter().all(|e| e.content != "устаревший факт"));

    // The dedup guard only covers active rows
    let new_id = services
        .memories
        .insert(&character.id, Some(&user), "fact", "general", "устаревший факт", 5)
        .await
        .unwrap();
    assert_ne!(new_id, id);
}

#[tokio::test]
async fn test_admin_delete_removes_row() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1010", None).await.unwrap();

    let id = services
        .memories
        .insert(&character.id, Some(&user), "fact", "general", "удаляемый факт", 5)
        .await
        .unwrap();
    services.memories.delete(&id).await.unwrap();

    let err = services.memories.deactivate(&id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_coalesce_legacy_type_column() {
    // P6: a row with type=T, memory_type=NULL reads back as memory_type=T,
    // and symmetrically.
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1006", None).await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO memory_entries (id, character_id, user_id, type, memory_type, category,
                                    content, importance, is_active, created_at, updated_at)
        VALUES (?, ?, ?, 'legacy_fact', NULL, 'general', 'старый формат', 5, TRUE,
                CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(character.id.to_string())
    .bind(user.to_string())
    .execute(&services.pool)
    .await
    .unwrap();

    sqlx::query(
        r#"
        INSERT INTO memory_entries (id, character_id, user_id, type, memory_type, category,
                                    content, importance, is_active, created_at, updated_at)
        VALUES (?, ?, ?, NULL, 'modern_fact', 'general', 'новый формат', 5, TRUE,
                CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(character.id.to_string())
    .bind(user.to_string())
    .execute(&services.pool)
    .await
    .unwrap();

    let entries = services.memories.query(&character.id, Some(&user), 50).await.unwrap();
    let legacy = entries.iter().find(|e| e.content == "старый формат").unwrap();
    assert_eq!(legacy.memory_type, "legacy_fact");
    let modern = entries.iter().find(|e| e.content == "новый формат").unwrap();
    assert_eq!(modern.memory_type, "modern_fact");
}

#[tokio::test]
async fn test_orphaned_memory_survives_user_deletion() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1007", None).await.unwrap();

    services
        .memories
        .insert(&character.id, Some(&user), "fact", "general", "осиротевший факт", 7)
        .await
        .unwrap();

    sqlx::query("DELETE FROM users WHERE CAST(id AS TEXT) = ?")
        .bind(user.to_string())
        .execute(&services.pool)
        .await
        .unwrap();

    let entries = services.memories.query(&character.id, None, 50).await.unwrap();
    let entry = entries.iter().find(|e| e.content == "осиротевший факт").unwrap();
    assert_eq!(entry.user_id, SYSTEM_USER_ID, "orphaned rows read back as system-owned");
}

#[tokio::test]
async fn test_schema_drift_falls_back_to_reduced_query() {
    // Simulate a live deployment losing the legacy column out from under us.
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("1008", None).await.unwrap();

    services
        .memories
        .insert(&character.id, Some(&user), "personal_info", "name", "Имя пользователя: Аня", 8)
        .await
        .unwrap();

    sqlx::raw_sql(
        "DROP TRIGGER memory_entries_type_sync; ALTER TABLE memory_entries DROP COLUMN type;",
    )
    .execute(&services.pool)
    .await
    .unwrap();

    // Reads recover through the re-probe
    let entries = services.memories.query(&character.id, Some(&user), 50).await.unwrap();
    let entry = entries.iter().find(|e| e.content == "Имя пользователя: Аня").unwrap();
    assert_eq!(entry.memory_type, "personal_info");

    // Writes recover too
    services
        .memories
        .insert(&character.id, Some(&user), "fact", "general", "после дрейфа", 5)
        .await
        .unwrap();
    let entries = services.memories.query(&character.id, Some(&user), 50).await.unwrap();
    assert!(entries.iter().any(|e| e.content == "после дрейфа"));
}
