use std::time::{SystemTime, UNIX_EPOCH};
use serde_json::json;

// Shared test context. These tests drive a running instance end to
// end over HTTP; start the server against a seeded database first and
// run them with `cargo test -- --ignored`.
struct TestContext {
    client: reqwest::Client,
    base_url: String,
}

impl TestContext {
    fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .cookie_store(true)
                .build()
                .unwrap(),
            base_url: std::env::var("E2E_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string()),
        }
    }

    fn device_id() -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        format!("e2e-device-{timestamp}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    // Seeded accounts without two-factor enabled.
    const EMAIL: &str = "alice@example.com";
    const PASSWORD: &str = "Str0ng!passphrase";
    const ADMIN_EMAIL: &str = "admin@example.com";
    const ADMIN_PASSWORD: &str = "Adm1n!passphrase";

    async fn login_as(context: &TestContext, email: &str, password: &str) -> Value {
        let response = context
            .client
            .post(format!("{}/api/auth/login", context.base_url))
            .json(&json!({
                "email": email,
                "password": password,
                "device_id": TestContext::device_id(),
                "remember_me": false,
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    async fn login(context: &TestContext) -> Value {
        login_as(context, EMAIL, PASSWORD).await
    }

    #[tokio::test]
    #[ignore = "requires a running server and seeded database"]
    async fn test_login_session_info_and_logout() {
        let context = TestContext::new();

        // Step 1: login.
        let body = login(&context).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["requires_two_factor"], false);
        let token = body["session_token"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 43);

        // Step 2: the token authorizes session-info.
        let info = context
            .client
            .get(format!("{}/api/auth/session-info", context.base_url))
            .header("X-Session-Token", &token)
            .send()
            .await
            .unwrap();
        assert_eq!(info.status(), 200);
        let info: Value = info.json().await.unwrap();
        assert!(info.get("session_token").is_none());

        // Step 3: logout closes the session.
        let logout = context
            .client
            .post(format!("{}/api/auth/logout", context.base_url))
            .header("X-Session-Token", &token)
            .send()
            .await
            .unwrap();
        assert_eq!(logout.status(), 200);

        // Step 4: the closed token no longer authorizes anything.
        let after = context
            .client
            .get(format!("{}/api/auth/session-info", context.base_url))
            .header("X-Session-Token", &token)
            .send()
            .await
            .unwrap();
        assert_eq!(after.status(), 401);
    }

    #[tokio::test]
    #[ignore = "requires a running server and seeded database"]
    async fn test_extend_session_moves_expiry_forward() {
        let context = TestContext::new();

        let body = login(&context).await;
        let token = body["session_token"].as_str().unwrap().to_string();
        let before = body["expires_at"].as_str().unwrap().to_string();

        let extended = context
            .client
            .post(format!("{}/api/auth/extend-session", context.base_url))
            .header("X-Session-Token", &token)
            .json(&json!({ "additional_minutes": 60 }))
            .send()
            .await
            .unwrap();
        assert_eq!(extended.status(), 200);

        let extended: Value = extended.json().await.unwrap();
        let after = extended["expires_at"].as_str().unwrap();
        assert!(after > before.as_str());
    }

    #[tokio::test]
    #[ignore = "requires a running server and seeded database"]
    async fn test_sixth_login_evicts_the_oldest_session() {
        let context = TestContext::new();

        let mut tokens = Vec::new();
        for _ in 0..6 {
            let body = login(&context).await;
            tokens.push(body["session_token"].as_str().unwrap().to_string());
        }

        // The first session was evicted by the sixth login.
        let first = context
            .client
            .get(format!("{}/api/auth/session-info", context.base_url))
            .header("X-Session-Token", &tokens[0])
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 401);

        // The newest still works.
        let last = context
            .client
            .get(format!("{}/api/auth/session-info", context.base_url))
            .header("X-Session-Token", &tokens[5])
            .send()
            .await
            .unwrap();
        assert_eq!(last.status(), 200);
    }

    #[tokio::test]
    #[ignore = "requires a running server and seeded database"]
    async fn test_bulk_revocation_with_nothing_to_revoke_is_not_found() {
        let context = TestContext::new();

        let body = login_as(&context, ADMIN_EMAIL, ADMIN_PASSWORD).await;
        let token = body["session_token"].as_str().unwrap().to_string();

        // A user id that exists in no session row.
        let response = context
            .client
            .post(format!(
                "{}/api/auth/revoke-user-sessions/00000000-0000-0000-0000-000000000000",
                context.base_url
            ))
            .header("X-Session-Token", &token)
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    #[ignore = "requires a running server and seeded database"]
    async fn test_admin_routes_refuse_non_admins() {
        let context = TestContext::new();

        let body = login(&context).await;
        let token = body["session_token"].as_str().unwrap().to_string();

        let response = context
            .client
            .get(format!("{}/api/audit/logs", context.base_url))
            .header("X-Session-Token", &token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 403);
    }
}
