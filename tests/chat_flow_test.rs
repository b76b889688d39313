// tests/chat_flow_test.rs
//! End-to-end boundary scenarios against in-memory SQLite and a scripted
//! oracle.

mod test_helpers;

use test_helpers::{MockOracle, create_test_character, setup_services};

use elara::chat::SendOutcome;
use elara::error::Error;
use elara::history::Role;

const EXTRACTION_REPLY: &str = r#"{"text":"Рада знакомству!","emotion":"happy","relationship_changes":{"general":0.1},"memory":[{"type":"personal_info","category":"name","content":"Имя пользователя: Пётр","importance":8},{"type":"personal_info","category":"age","content":"Возраст: 31","importance":6}]}"#;

#[tokio::test]
async fn test_start_chat_uses_default_greeting_for_strangers() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;

    let greeting = services.chat.start_chat(&character.id, "5001").await.unwrap();
    assert!(greeting.content.contains("Рада познакомиться"));

    // The greeting lands in both the log and the messages projection
    let user = services.users.resolve("5001").await.unwrap().unwrap();
    let rows = services.history.fetch_recent(&character.id, &user.id, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].role, Role::Assistant);
}

#[tokio::test]
async fn test_start_chat_personalised_by_name_memory() {
    // Scenario: a name-typed memory exists, so the greeting addresses the
    // user by name.
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("5002", None).await.unwrap();

    services
        .memories
        .insert(&character.id, Some(&user), "personal_info", "name", "Имя пользователя: Аня", 8)
        .await
        .unwrap();

    let greeting = services.chat.start_chat(&character.id, "5002").await.unwrap();
    assert!(greeting.content.contains("Аня"), "greeting must use the remembered name");
    assert!(greeting.content.contains("снова"));
}

#[tokio::test]
async fn test_start_chat_missing_character() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let err = services.chat.start_chat(&uuid::Uuid::new_v4(), "5003").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_send_message_extracts_memories_without_duplicates() {
    // Scenario: the oracle attaches a structured memory block; both facts
    // land in the store and a second identical turn adds nothing.
    let services =
        setup_services(MockOracle::scripted(&[EXTRACTION_REPLY, EXTRACTION_REPLY])).await;
    let character = create_test_character(&services, "Алиса").await;

    let outcome = services
        .chat
        .send_message(&character.id, "5004", "меня зовут Пётр, мне 31")
        .await
        .unwrap();
    match outcome {
        SendOutcome::Single { text, emotion, .. } => {
            assert_eq!(text, "Рада знакомству!");
            assert_eq!(emotion, "happy");
        }
        SendOutcome::Multi { .. } => panic!("expected a single reply"),
    }

    let memories = services.chat.list_memories(&character.id, Some("5004"), 50).await.unwrap();
    assert!(memories.iter().any(|m| m.content == "Имя пользователя: Пётр"));
    assert!(memories.iter().any(|m| m.content == "Возраст: 31"));

    services
        .chat
        .send_message(&character.id, "5004", "меня зовут Пётр, мне 31")
        .await
        .unwrap();

    let memories = services.chat.list_memories(&character.id, Some("5004"), 50).await.unwrap();
    let names: Vec<_> =
        memories.iter().filter(|m| m.content == "Имя пользователя: Пётр").collect();
    assert_eq!(names.len(), 1, "repeated extraction must not duplicate");
}

#[tokio::test]
async fn test_send_message_records_both_turns() {
    let services = setup_services(MockOracle::scripted(&[EXTRACTION_REPLY])).await;
    let character = create_test_character(&services, "Алиса").await;

    services.chat.send_message(&character.id, "5005", "привет").await.unwrap();

    let user = services.users.resolve("5005").await.unwrap().unwrap();
    let rows = services.history.fetch_recent(&character.id, &user.id, 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].role, Role::User);
    assert_eq!(rows[0].content, "привет");
    assert_eq!(rows[1].role, Role::Assistant);

    let messages = services.messages.recent_between(&character.id, &user.id, 10).await.unwrap();
    assert_eq!(messages.len(), 2);

    // The character's emotion follows the reply
    let character = services.characters.get(&character.id).await.unwrap();
    assert_eq!(character.current_emotion.as_deref(), Some("happy"));
}

#[tokio::test]
async fn test_send_message_multi_part_reply() {
    let reply = r#"{"messages":[{"text":"Ого!","emotion":"surprised"},{"text":"Расскажи подробнее, мне правда интересно."}],"relationship_changes":{"friendship":0.05}}"#;
    let services = setup_services(MockOracle::scripted(&[reply])).await;
    let character = create_test_character(&services, "Алиса").await;

    let outcome = services.chat.send_message(&character.id, "5006", "у меня новость").await.unwrap();
    let parts = match outcome {
        SendOutcome::Multi { multi_messages, .. } => multi_messages,
        SendOutcome::Single { .. } => panic!("expected a multi-part reply"),
    };
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].emotion, "surprised");

    let user = services.users.resolve("5006").await.unwrap().unwrap();
    let rows = services.history.fetch_recent(&character.id, &user.id, 10).await.unwrap();
    assert_eq!(rows.len(), 3, "user turn plus one row per reply part");
}

#[tokio::test]
async fn test_send_message_upstream_failure_leaves_no_state() {
    let services = setup_services(MockOracle::failing()).await;
    let character = create_test_character(&services, "Алиса").await;

    let err = services.chat.send_message(&character.id, "5007", "привет").await.unwrap_err();
    assert!(matches!(err, Error::UpstreamError(_)));

    let user = services.users.resolve("5007").await.unwrap().unwrap();
    assert_eq!(services.history.count_active(&character.id, &user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_gift_retry_and_side_effects() {
    // Scenario: empty reaction first, a real one on the retry; affinity
    // moves by effect * alpha; event and memory are recorded.
    let services = setup_services(MockOracle::scripted(&[
        r#"{"text":"","emotion":"neutral"}"#,
        r#"{"text":"*удивлённо*","emotion":"surprised"}"#,
    ]))
    .await;
    let character = create_test_character(&services, "Алиса").await;

    let outcome = services.chat.send_gift(&character.id, "5008", "flower").await.unwrap();
    assert_eq!(outcome.reaction.text, "*удивлённо*");
    assert_eq!(outcome.reaction.emotion, "surprised");

    let user = services.users.resolve("5008").await.unwrap().unwrap();
    let state = services.relationships.get_or_init(&user.id, &character.id).await.unwrap();
    assert!((state.general - 0.55).abs() < 1e-9, "general += 5 * 0.01");
    assert!((state.friendship - 0.035).abs() < 1e-9);

    let events = services.events.by_type(&character.id, "gift_received", 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].data.as_ref().unwrap().get("gift_name").unwrap().as_str().unwrap(),
        "Букет цветов"
    );

    let memories = services.chat.list_memories(&character.id, Some("5008"), 50).await.unwrap();
    assert!(memories.iter().any(|m| m.content.contains("Букет цветов")));

    let rows = services.history.fetch_recent(&character.id, &user.id, 10).await.unwrap();
    assert_eq!(rows.len(), 2, "gift system row plus the reaction");
    assert_eq!(rows[0].role, Role::System);
}

#[tokio::test]
async fn test_gift_good_first_reaction_skips_retry() {
    let oracle = MockOracle::scripted(&[
        r#"{"text":"Какая прелесть, спасибо тебе огромное!","emotion":"happy"}"#,
    ]);
    let services = setup_services(oracle.clone()).await;
    let character = create_test_character(&services, "Алиса").await;

    services.chat.send_gift(&character.id, "5009", "teddy").await.unwrap();
    assert_eq!(oracle.call_count(), 1, "at most one oracle call when the reaction is fine");
}

#[tokio::test]
async fn test_gift_unknown_id_is_invalid_input() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let err = services.chat.send_gift(&character.id, "5010", "rocket").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_clear_history_counts_and_resets() {
    let services = setup_services(MockOracle::scripted(&[EXTRACTION_REPLY, EXTRACTION_REPLY])).await;
    let character = create_test_character(&services, "Алиса").await;

    services.chat.send_message(&character.id, "5011", "привет").await.unwrap();
    services.chat.send_message(&character.id, "5011", "как дела?").await.unwrap();

    let cleared = services.chat.clear_history(&character.id, "5011").await.unwrap();
    assert_eq!(cleared, 4);

    let user = services.users.resolve("5011").await.unwrap().unwrap();
    assert_eq!(services.history.count_active(&character.id, &user.id).await.unwrap(), 0);
    assert!(services.messages.recent_between(&character.id, &user.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_external_and_internal_ids_are_interchangeable() {
    // P1 at the boundary: the same external id always lands on the same
    // internal user.
    let services = setup_services(MockOracle::scripted(&[EXTRACTION_REPLY])).await;
    let character = create_test_character(&services, "Алиса").await;

    services.chat.send_message(&character.id, "777000111", "меня зовут Пётр").await.unwrap();
    let user = services.users.resolve("777000111").await.unwrap().unwrap();

    let by_external =
        services.chat.list_memories(&character.id, Some("777000111"), 50).await.unwrap();
    let by_internal = services
        .chat
        .list_memories(&character.id, Some(&user.id.to_string()), 50)
        .await
        .unwrap();
    assert_eq!(by_external.len(), by_internal.len());
    assert!(!by_external.is_empty());
}
