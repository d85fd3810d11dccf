use crate::{
    error::{AppError, Result},
    models::user::User,
};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, username, full_name, password_hash, roles, \
two_factor_enabled, is_active, created_at";

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        email: row.try_get("email").map_err(|_| AppError::MissingData("email".to_string()))?,
        username: row.try_get("username").map_err(|_| AppError::MissingData("username".to_string()))?,
        full_name: row.try_get("full_name").map_err(|_| AppError::MissingData("full_name".to_string()))?,
        password_hash: row.try_get("password_hash").map_err(|_| AppError::MissingData("password_hash".to_string()))?,
        roles: row.try_get("roles").map_err(|_| AppError::MissingData("roles".to_string()))?,
        two_factor_enabled: row.try_get("two_factor_enabled").map_err(|_| AppError::MissingData("two_factor_enabled".to_string()))?,
        is_active: row.try_get("is_active").map_err(|_| AppError::MissingData("is_active".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
    })
}

/// Finds an active user by email address.
pub async fn find_by_email(pool: &Pool, email: &str) -> Result<Option<User>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                r#"
                SELECT {USER_COLUMNS}
                FROM users
                WHERE email = $1 AND is_active = true
                "#
            ),
            &[&email],
        )
        .await?;
    row.map(|r| row_to_user(&r)).transpose()
}

/// Finds a user by ID, active or not.
pub async fn find_by_id(pool: &Pool, user_id: &Uuid) -> Result<Option<User>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!(
                r#"
                SELECT {USER_COLUMNS}
                FROM users
                WHERE id = $1
                "#
            ),
            &[user_id],
        )
        .await?;
    row.map(|r| row_to_user(&r)).transpose()
}
