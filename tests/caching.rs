mod support;

use secrets_encryption::EncryptionOptions;
use support::{CountingProvider, CountingStore, MINUTE, build_manager, start_clock, test_config};

#[tokio::test]
async fn label_cache_respects_caution_period_and_ttl() {
    let store = CountingStore::new();
    let provider = CountingProvider::default();
    let clock = start_clock();
    let manager = build_manager(store.clone(), provider.clone(), clock.clone(), test_config()).await;
    let options = EncryptionOptions::with_scope("secret:aws");

    // t=0: key created, nothing cached.
    manager.encrypt("org1", b"v0", &options).await.unwrap();
    assert_eq!(store.current_gets(), 1);
    assert_eq!(store.creates(), 1);
    assert_eq!(manager.cache().len("org1"), (0, 0));

    // t=2m: too young for the label index, resolved from storage again.
    clock.advance(2 * MINUTE);
    manager.encrypt("org1", b"v1", &options).await.unwrap();
    assert_eq!(store.current_gets(), 2);
    assert_eq!(manager.cache().len("org1"), (1, 0));

    // t=11m: first lookup admits the key, the next one is served from cache.
    clock.advance(9 * MINUTE);
    manager.encrypt("org1", b"v2", &options).await.unwrap();
    assert_eq!(store.current_gets(), 3);
    manager.encrypt("org1", b"v3", &options).await.unwrap();
    assert_eq!(store.current_gets(), 3);
    assert_eq!(manager.cache().len("org1"), (1, 1));

    // t=12m: the entry inserted at t=11m has expired.
    clock.advance(MINUTE);
    assert_eq!(manager.cache().remove_expired(), 2);
    assert_eq!(manager.cache().len("org1"), (0, 0));
    manager.encrypt("org1", b"v4", &options).await.unwrap();
    assert_eq!(store.current_gets(), 4);

    assert_eq!(store.creates(), 1);
    assert_eq!(provider.calls().0, 1);
}

#[tokio::test]
async fn decrypt_never_populates_label_index() {
    let store = CountingStore::new();
    let clock = start_clock();
    let manager = build_manager(
        store.clone(),
        CountingProvider::default(),
        clock.clone(),
        test_config(),
    )
    .await;

    let blob = manager
        .encrypt("org1", b"payload", &EncryptionOptions::default())
        .await
        .unwrap();
    clock.advance(20 * MINUTE);

    manager.decrypt("org1", &blob).await.unwrap();
    assert_eq!(store.id_gets(), 1);
    assert_eq!(manager.cache().len("org1"), (1, 0));
    assert!(
        manager
            .cache()
            .get_by_label("org1", "root@secret_key.v1")
            .is_none()
    );

    manager.decrypt("org1", &blob).await.unwrap();
    assert_eq!(store.id_gets(), 1);
}

#[tokio::test]
async fn decrypt_refetches_after_expiry() {
    let store = CountingStore::new();
    let provider = CountingProvider::default();
    let clock = start_clock();
    let manager = build_manager(store.clone(), provider.clone(), clock.clone(), test_config()).await;

    let blob = manager
        .encrypt("org1", b"payload", &EncryptionOptions::default())
        .await
        .unwrap();
    manager.decrypt("org1", &blob).await.unwrap();
    manager.decrypt("org1", &blob).await.unwrap();
    assert_eq!(store.id_gets(), 1);
    assert_eq!(provider.calls().1, 1);

    clock.advance(2 * MINUTE);
    manager.decrypt("org1", &blob).await.unwrap();
    assert_eq!(store.id_gets(), 2);
    assert_eq!(provider.calls().1, 2);
}

#[tokio::test]
async fn aged_key_is_cached_for_encryption_on_first_lookup() {
    let store = CountingStore::new();
    let clock = start_clock();
    let manager = build_manager(
        store.clone(),
        CountingProvider::default(),
        clock.clone(),
        test_config(),
    )
    .await;
    let options = EncryptionOptions::default();

    let first = manager.encrypt("org1", b"a", &options).await.unwrap();
    clock.advance(30 * MINUTE);

    let second = manager.encrypt("org1", b"b", &options).await.unwrap();
    let third = manager.encrypt("org1", b"c", &options).await.unwrap();
    assert_eq!(store.current_gets(), 2);

    assert_eq!(manager.decrypt("org1", &first).await.unwrap(), b"a");
    assert_eq!(manager.decrypt("org1", &second).await.unwrap(), b"b");
    assert_eq!(manager.decrypt("org1", &third).await.unwrap(), b"c");
    // Served from the id index populated by the label lookup.
    assert_eq!(store.id_gets(), 0);
}
