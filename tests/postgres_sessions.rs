//! Store semantics against a real Postgres.
//!
//! Needs the database from `configuration.yaml`; run with `cargo test -- --ignored`.

use campus_hub::auth::{
    CredentialStore, NewCredential, PgCredentialStore, PgRefreshSessionStore, RefreshSessionStore,
    Role,
};
use campus_hub::configuration::{get_configuration, DatabaseSettings};
use chrono::{Duration, Utc};
use sqlx::{Connection, Executor, PgConnection, PgPool};

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    // Migrate database
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn fresh_pool() -> PgPool {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    configure_database(&configuration.database).await
}

async fn insert_user(pool: &PgPool, email: &str) -> i64 {
    PgCredentialStore::new(pool.clone())
        .insert(NewCredential {
            email: email.to_string(),
            name: "Test".to_string(),
            lastname: "User".to_string(),
            password_hash: "$2b$04$placeholder".to_string(),
            role: Role::Student,
        })
        .await
        .expect("Failed to insert user")
}

async fn session_rows(pool: &PgPool, principal_id: i64) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM refresh_sessions WHERE principal_id = $1")
        .bind(principal_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn in_a_week() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::days(7)
}

#[tokio::test]
#[ignore]
async fn credentials_round_trip_and_reject_duplicates() {
    let pool = fresh_pool().await;
    let store = PgCredentialStore::new(pool.clone());
    let id = insert_user(&pool, "a@b.com").await;

    let found = store.find_by_email("a@b.com").await.unwrap().unwrap();
    assert_eq!(found.id, id);
    assert_eq!(found.role, Role::Student);
    assert_eq!(store.find_by_id(id).await.unwrap().unwrap().email, "a@b.com");

    let duplicate = store
        .insert(NewCredential {
            email: "a@b.com".to_string(),
            name: "Other".to_string(),
            lastname: "User".to_string(),
            password_hash: "$2b$04$placeholder".to_string(),
            role: Role::Student,
        })
        .await
        .unwrap_err();
    assert_eq!(
        actix_web::ResponseError::status_code(&duplicate),
        actix_web::http::StatusCode::CONFLICT
    );
}

#[tokio::test]
#[ignore]
async fn issue_twice_leaves_one_row() {
    let pool = fresh_pool().await;
    let store = PgRefreshSessionStore::new(pool.clone());
    let id = insert_user(&pool, "a@b.com").await;

    store.issue(id, "refresh-a", in_a_week()).await.unwrap();
    store.issue(id, "refresh-b", in_a_week()).await.unwrap();

    assert_eq!(session_rows(&pool, id).await, 1);
    let current = store.get_by_principal(id).await.unwrap().unwrap();
    assert!(current.matches("refresh-b"));
    assert_ne!(current.token_hash, "refresh-b");
}

#[tokio::test]
#[ignore]
async fn rotate_is_compare_and_swap() {
    let pool = fresh_pool().await;
    let store = PgRefreshSessionStore::new(pool.clone());
    let id = insert_user(&pool, "a@b.com").await;
    store.issue(id, "refresh-a", in_a_week()).await.unwrap();

    let (left, right) = tokio::join!(
        store.rotate(id, "refresh-a", "refresh-b", in_a_week()),
        store.rotate(id, "refresh-a", "refresh-c", in_a_week()),
    );
    let winners = [left.unwrap(), right.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(session_rows(&pool, id).await, 1);
}

#[tokio::test]
#[ignore]
async fn expired_session_does_not_rotate() {
    let pool = fresh_pool().await;
    let store = PgRefreshSessionStore::new(pool.clone());
    let id = insert_user(&pool, "a@b.com").await;
    store
        .issue(id, "refresh-a", Utc::now() - Duration::seconds(1))
        .await
        .unwrap();

    let rotated = store
        .rotate(id, "refresh-a", "refresh-b", in_a_week())
        .await
        .unwrap();
    assert!(rotated.is_none());
}

#[tokio::test]
#[ignore]
async fn revocation_is_idempotent_and_cascades() {
    let pool = fresh_pool().await;
    let store = PgRefreshSessionStore::new(pool.clone());
    let a = insert_user(&pool, "a@b.com").await;
    let b = insert_user(&pool, "c@d.com").await;
    store.issue(a, "refresh-a", in_a_week()).await.unwrap();
    store.issue(b, "refresh-b", in_a_week()).await.unwrap();

    store.revoke_by_token("refresh-a").await.unwrap();
    store.revoke_by_token("refresh-a").await.unwrap();
    assert!(store.get_by_principal(a).await.unwrap().is_none());

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(b)
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(session_rows(&pool, b).await, 0);

    store.revoke_by_principal(b).await.unwrap();
}
