use photo_api::memory::InMemoryBackend;
use photo_api::{ApiError, PhotoApi, RegisterRequest};
use std::sync::Arc;
use tempfile::tempdir;
use uploader_core::session::{SessionHolder, SessionStore, SqliteSessionStore};

async fn sqlite_store(dir: &std::path::Path) -> Arc<SqliteSessionStore> {
    let pool = storage::connect(&dir.join("photoup.db").to_string_lossy())
        .await
        .unwrap();
    storage::migrate(&pool).await.unwrap();
    Arc::new(SqliteSessionStore::new(pool))
}

async fn backend_with_account() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    backend
        .register(&RegisterRequest {
            email: "ana@example.com".into(),
            password: "secret1".into(),
            full_name: "Ana".into(),
        })
        .await
        .unwrap();
    backend
}

#[tokio::test]
async fn correct_login_persists_and_survives_restart() {
    let temp = tempdir().unwrap();
    let backend = backend_with_account().await;
    let store = sqlite_store(temp.path()).await;

    let holder = SessionHolder::new(backend.clone(), store.clone());
    let session = holder.login("ana@example.com", "secret1").await.unwrap();
    assert!(holder.is_authenticated());
    assert_eq!(holder.token(), Some(session.token.clone()));
    assert_eq!(session.user.full_name, "Ana");

    let restarted = SessionHolder::new(backend, store);
    assert!(!restarted.is_authenticated());
    let restored = restarted.restore().await.unwrap().unwrap();
    assert_eq!(restored, session);
    assert!(restarted.is_authenticated());
}

#[tokio::test]
async fn wrong_password_persists_nothing() {
    let temp = tempdir().unwrap();
    let backend = backend_with_account().await;
    let store = sqlite_store(temp.path()).await;
    let holder = SessionHolder::new(backend, store.clone());

    let err = holder.login("ana@example.com", "nope").await.unwrap_err();
    assert_eq!(
        err.api(),
        Some(&ApiError::Unauthorized("Invalid email or password".into()))
    );
    assert!(!holder.is_authenticated());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn logout_clears_persisted_state() {
    let temp = tempdir().unwrap();
    let backend = backend_with_account().await;
    let store = sqlite_store(temp.path()).await;
    let holder = SessionHolder::new(backend, store.clone());
    holder.login("ana@example.com", "secret1").await.unwrap();

    holder.logout().await;
    assert!(!holder.is_authenticated());
    assert!(store.load().await.unwrap().is_none());
    // Logging out twice is harmless.
    holder.logout().await;
}

#[tokio::test]
async fn registration_errors_surface_verbatim() {
    let backend = backend_with_account().await;
    let holder = SessionHolder::new(
        backend.clone(),
        Arc::new(uploader_core::session::MemorySessionStore::default()),
    );
    let err = holder
        .register("ana@example.com", "secret1", "Ana Again")
        .await
        .unwrap_err();
    assert_eq!(
        err.api(),
        Some(&ApiError::Conflict("Email already registered".into()))
    );

    let err = holder.register("not-an-email", "secret1", "X").await.unwrap_err();
    assert!(matches!(err.api(), Some(ApiError::Validation(_))));
    assert_eq!(backend.call_count("register"), 2);
}

#[tokio::test]
async fn observers_see_sign_in_and_auth_rejection() {
    let backend = backend_with_account().await;
    let holder = SessionHolder::new(
        backend.clone(),
        Arc::new(uploader_core::session::MemorySessionStore::default()),
    );
    let mut rx = holder.subscribe();

    holder.login("ana@example.com", "secret1").await.unwrap();
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_some());

    backend.revoke_tokens();
    let token = holder.token();
    let result = holder
        .guard(backend.get_photo(token.as_deref(), "photo-x").await)
        .await;
    assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_none());
    assert!(!holder.is_authenticated());
}

#[tokio::test]
async fn non_auth_errors_keep_the_session() {
    let backend = backend_with_account().await;
    let holder = SessionHolder::new(
        backend.clone(),
        Arc::new(uploader_core::session::MemorySessionStore::default()),
    );
    holder.login("ana@example.com", "secret1").await.unwrap();
    let token = holder.token();
    let result = holder
        .guard(backend.get_photo(token.as_deref(), "missing").await)
        .await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
    assert!(holder.is_authenticated());
}
