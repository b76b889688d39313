// tests/relationship_test.rs

mod test_helpers;

use test_helpers::{MockOracle, create_test_character, setup_services};

use elara::relationship::{AffinityDelta, Stage};

#[tokio::test]
async fn test_new_pair_starts_as_acquaintances() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("4001", None).await.unwrap();

    let state = services.relationships.get_or_init(&user, &character.id).await.unwrap();
    assert!((state.general - 0.5).abs() < 1e-9);
    assert_eq!(state.stage, Stage::Acquaintances);
}

#[tokio::test]
async fn test_updates_persist_and_saturate() {
    // P5: any sequence of updates keeps affinities in [0, 1] and no single
    // update moves a dimension by more than 0.2.
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("4002", None).await.unwrap();

    let state = services
        .relationships
        .apply(&user, &character.id, &AffinityDelta { general: 5.0, ..Default::default() }, false)
        .await
        .unwrap();
    assert!((state.general - 0.7).abs() < 1e-9, "clipped to +0.2 per turn");

    for _ in 0..10 {
        services
            .relationships
            .apply(
                &user,
                &character.id,
                &AffinityDelta { general: 0.2, trust: 0.2, ..Default::default() },
                false,
            )
            .await
            .unwrap();
    }
    let state = services.relationships.get_or_init(&user, &character.id).await.unwrap();
    assert_eq!(state.general, 1.0);
    assert_eq!(state.trust, 1.0);

    for _ in 0..10 {
        services
            .relationships
            .apply(
                &user,
                &character.id,
                &AffinityDelta { general: -0.2, ..Default::default() },
                false,
            )
            .await
            .unwrap();
    }
    let state = services.relationships.get_or_init(&user, &character.id).await.unwrap();
    assert_eq!(state.general, 0.0);
}

#[tokio::test]
async fn test_stage_progression() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("4003", None).await.unwrap();

    let state = services
        .relationships
        .apply(&user, &character.id, &AffinityDelta { general: 0.2, ..Default::default() }, false)
        .await
        .unwrap();
    assert_eq!(state.stage, Stage::Friends, "general 0.7 crosses the friends threshold");

    let mut state = state;
    for _ in 0..5 {
        state = services
            .relationships
            .apply(
                &user,
                &character.id,
                &AffinityDelta { friendship: 0.2, romance: 0.2, ..Default::default() },
                false,
            )
            .await
            .unwrap();
    }
    assert_eq!(state.stage, Stage::Close);
}

#[tokio::test]
async fn test_gift_delta_matches_advertised_effect() {
    let services = setup_services(MockOracle::scripted(&[])).await;
    let character = create_test_character(&services, "Алиса").await;
    let user = services.users.ensure("4004", None).await.unwrap();

    let delta = AffinityDelta::for_gift(10);
    let state = services.relationships.apply(&user, &character.id, &delta, false).await.unwrap();

    assert!((state.general - 0.6).abs() < 1e-9);
    assert!((state.friendship - 0.07).abs() < 1e-9);
    assert!((state.romance - 0.03).abs() < 1e-9);
    assert!((state.trust - 0.05).abs() < 1e-9);
}
