use kol_registry::{AppConfig, AppState, MemoryRepository, create_router};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub admin_id: i32,
}

/// Spawns the full router on an ephemeral port, backed by the in-memory
/// repository with the administrator account seeded, so tests exercise the
/// real HTTP surface without a Postgres instance.
async fn spawn_app() -> TestApp {
    let config = AppConfig::default();

    let repo = MemoryRepository::new();
    // Minimum bcrypt cost keeps the test suite fast.
    let admin_hash = bcrypt::hash(&config.seed_admin_password, 4).unwrap();
    let admin_id = repo.seed_admin(&config.seed_admin_username, &admin_hash);

    let state = AppState {
        repo: Arc::new(repo),
        config,
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address, admin_id }
}

/// Creates a Member account through the admin procedure and returns its id.
async fn create_member(app: &TestApp, client: &reqwest::Client, username: &str) -> i32 {
    let resp = client
        .post(format!("{}/rpc/createUser", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({
            "fullname": format!("{} fullname", username),
            "username": username,
            "password": "member-pass",
            "roleId": 2
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "createUser should succeed");
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_i64().unwrap() as i32
}

/// Registers a follower. `actor` is an x-user-id header value, or None for
/// an anonymous registration.
async fn create_follower(
    app: &TestApp,
    client: &reqwest::Client,
    actor: Option<i32>,
    name: &str,
) -> reqwest::Response {
    let mut req = client
        .post(format!("{}/rpc/createFollower", app.address))
        .json(&serde_json::json!({
            "fullname": name,
            "phoneNumber": "0812345678",
            "arrivalDate": "2025-06-01"
        }));
    if let Some(id) = actor {
        req = req.header("x-user-id", id.to_string());
    }
    req.send().await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_login_returns_matching_claims() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/rpc/login", app.address))
        .json(&serde_json::json!({"username": "magenta", "password": "magentasatu2025"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(body["user"]["username"], "magenta");
    assert_eq!(body["user"]["role"], "Administrator");
    // The hash must never appear anywhere in the login payload.
    assert!(!body.to_string().contains("$2"));

    // Decode the issued token against the test secret and compare claims.
    let token = body["accessToken"].as_str().unwrap();
    let config = AppConfig::default();
    let data = jsonwebtoken::decode::<kol_registry::auth::Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &jsonwebtoken::Validation::default(),
    )
    .unwrap();
    assert_eq!(data.claims.sub, app.admin_id);
    assert_eq!(data.claims.username, "magenta");
}

#[tokio::test]
async fn test_login_rejects_bad_credentials_identically() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let wrong_password = client
        .post(format!("{}/rpc/login", app.address))
        .json(&serde_json::json!({"username": "magenta", "password": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status(), 401);
    let body: serde_json::Value = wrong_password.json().await.unwrap();
    assert_eq!(body["message"], "Invalid Credentials");

    let unknown_user = client
        .post(format!("{}/rpc/login", app.address))
        .json(&serde_json::json!({"username": "ghost", "password": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_user.status(), 401);
    let body: serde_json::Value = unknown_user.json().await.unwrap();
    assert_eq!(body["message"], "Invalid Credentials");
}

#[tokio::test]
async fn test_bearer_token_authenticates_procedures() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let login: serde_json::Value = client
        .post(format!("{}/rpc/login", app.address))
        .json(&serde_json::json!({"username": "magenta", "password": "magentasatu2025"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = login["accessToken"].as_str().unwrap();

    let resp = client
        .post(format!("{}/rpc/getUsers", app.address))
        .bearer_auth(token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Garbage token is rejected even though the route exists.
    let resp = client
        .post(format!("{}/rpc/getUsers", app.address))
        .bearer_auth("not-a-token")
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_user_procedures_require_admin_role() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let member_id = create_member(&app, &client, "kol_jane").await;

    // No credential at all.
    let resp = client
        .post(format!("{}/rpc/getUsers", app.address))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // A valid member is authenticated but not authorized.
    let resp = client
        .post(format!("{}/rpc/getUsers", app.address))
        .header("x-user-id", member_id.to_string())
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_user_lifecycle() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let member_id = create_member(&app, &client, "kol_dana").await;

    // Duplicate username is a conflict, not a crash.
    let resp = client
        .post(format!("{}/rpc/createUser", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({
            "fullname": "Duplicate", "username": "kol_dana",
            "password": "x", "roleId": 2
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Unknown role id is rejected up front.
    let resp = client
        .post(format!("{}/rpc/createUser", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({
            "fullname": "X", "username": "unique_name",
            "password": "x", "roleId": 9
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Update, keeping the password.
    let resp = client
        .post(format!("{}/rpc/updateUser", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({
            "id": member_id, "fullname": "Dana Renamed", "username": "kol_dana"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["fullname"], "Dana Renamed");

    // The old password still logs in (no rotation happened).
    let resp = client
        .post(format!("{}/rpc/login", app.address))
        .json(&serde_json::json!({"username": "kol_dana", "password": "member-pass"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Delete, then delete again: the second call is an explicit not-found.
    let resp = client
        .post(format!("{}/rpc/deleteUser", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({"id": member_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/rpc/deleteUser", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({"id": member_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_public_registration_is_unattributed() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = create_follower(&app, &client, None, "Walk-in Guest").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["memberId"].is_null());

    // Admin listing with hasMember=false sees exactly this row.
    let resp = client
        .post(format!("{}/rpc/getFollowers", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({"hasMember": false}))
        .send()
        .await
        .unwrap();
    let rows: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["memberId"].is_null());
}

#[tokio::test]
async fn test_member_registration_attributes_to_self() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let member_id = create_member(&app, &client, "kol_amir").await;

    let resp = create_follower(&app, &client, Some(member_id), "Referred Guest").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["memberId"].as_i64().unwrap() as i32, member_id);
}

#[tokio::test]
async fn test_follower_cap_rejects_the_eleventh() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let member_id = create_member(&app, &client, "kol_full").await;

    for i in 0..10 {
        let resp = create_follower(&app, &client, Some(member_id), &format!("Guest {}", i)).await;
        assert_eq!(resp.status(), 200, "follower {} should fit under the cap", i);
    }

    let resp = create_follower(&app, &client, Some(member_id), "One Too Many").await;
    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Conflict");

    // Anonymous registration is unaffected by any member's cap.
    let resp = create_follower(&app, &client, None, "Public Guest").await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_member_scope_pins_all_follower_procedures() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let member_a = create_member(&app, &client, "kol_a").await;
    let member_b = create_member(&app, &client, "kol_b").await;

    create_follower(&app, &client, Some(member_a), "A Guest").await;
    let resp = create_follower(&app, &client, Some(member_b), "B Guest").await;
    let b_follower: serde_json::Value = resp.json().await.unwrap();
    let b_follower_id = b_follower["id"].as_i64().unwrap();

    // A's listing contains only A's rows, even when asking for B's.
    let resp = client
        .post(format!("{}/rpc/getFollowers", app.address))
        .header("x-user-id", member_a.to_string())
        .json(&serde_json::json!({"memberId": member_b}))
        .send()
        .await
        .unwrap();
    let rows: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["memberId"].as_i64().unwrap() as i32, member_a);

    // A's count matches A's list.
    let resp = client
        .post(format!("{}/rpc/getTotalFollowers", app.address))
        .header("x-user-id", member_a.to_string())
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    let count: i64 = resp.json().await.unwrap();
    assert_eq!(count, 1);

    // A cannot update or delete B's follower: scoped to zero rows.
    let resp = client
        .post(format!("{}/rpc/updateFollower", app.address))
        .header("x-user-id", member_a.to_string())
        .json(&serde_json::json!({
            "id": b_follower_id, "fullname": "Hijacked",
            "phoneNumber": "000", "arrivalDate": "2025-01-01"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/rpc/deleteFollower", app.address))
        .header("x-user-id", member_a.to_string())
        .json(&serde_json::json!({"id": b_follower_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // The administrator can touch the same row.
    let resp = client
        .post(format!("{}/rpc/deleteFollower", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({"id": b_follower_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_follower_pagination_second_page() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    for i in 1..=25 {
        let resp = create_follower(&app, &client, None, &format!("Guest {:02}", i)).await;
        assert_eq!(resp.status(), 200);
    }

    let page = |n: i64| {
        let client = client.clone();
        let address = app.address.clone();
        let admin = app.admin_id;
        async move {
            let rows: Vec<serde_json::Value> = client
                .post(format!("{}/rpc/getFollowers", address))
                .header("x-user-id", admin.to_string())
                .json(&serde_json::json!({"page": n}))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            rows
        }
    };

    let first = page(1).await;
    let second = page(2).await;
    let third = page(3).await;

    assert_eq!(first.len(), 10);
    assert_eq!(second.len(), 10);
    assert_eq!(third.len(), 5);

    // Most recent first: page 2 holds rows 11-20 of the default order.
    let first_ids: Vec<i64> = first.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    let second_ids: Vec<i64> = second.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(first_ids, (16..=25).rev().collect::<Vec<i64>>());
    assert_eq!(second_ids, (6..=15).rev().collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_follower_search_matches_own_and_member_name() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let member_id = create_member(&app, &client, "kol_sari").await;

    create_follower(&app, &client, Some(member_id), "Budi").await;
    create_follower(&app, &client, None, "Citra").await;
    create_follower(&app, &client, None, "Unrelated").await;

    // Case-insensitive match on the follower's own name.
    let rows: Vec<serde_json::Value> = client
        .post(format!("{}/rpc/getFollowers", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({"search": "cit"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["fullname"], "Citra");

    // Match through the linked member's name ("kol_sari fullname").
    let rows: Vec<serde_json::Value> = client
        .post(format!("{}/rpc/getFollowers", app.address))
        .header("x-user-id", app.admin_id.to_string())
        .json(&serde_json::json!({"search": "SARI"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["fullname"], "Budi");
}

#[tokio::test]
async fn test_roles_endpoint_envelope() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/roles", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let roles = body["data"].as_array().unwrap();
    assert_eq!(roles.len(), 2);
    assert_eq!(roles[0]["name"], "Administrator");
    assert_eq!(roles[1]["name"], "Member");
}

#[tokio::test]
async fn test_export_download_headers_and_magic() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let member_id = create_member(&app, &client, "kol_export").await;
    create_follower(&app, &client, Some(member_id), "Attributed").await;
    create_follower(&app, &client, None, "Public").await;

    let resp = client
        .get(format!("{}/api/export", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
    assert_eq!(
        resp.headers().get("content-disposition").unwrap(),
        "attachment; filename=data.xlsx"
    );

    let bytes = resp.bytes().await.unwrap();
    // xlsx is a zip container; a valid one starts with the PK magic.
    assert_eq!(&bytes[0..2], b"PK");
}
