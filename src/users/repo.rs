use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{User, UserCredentials, UserField, UserPatch};
use crate::error::{AccountError, AccountResult};

/// Storage contract for user records.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_field(&self, field: &UserField) -> AccountResult<Option<User>>;

    /// Insert or fully replace. Fails with `Conflict` when username or email
    /// belongs to another record. Credential changes on existing users go
    /// through `update_credentials` instead.
    async fn save_user(&self, user: &User) -> AccountResult<()>;

    /// Write only the password columns. With `expected_reset_token` set, the
    /// write happens only while that digest is still stored, checked atomically
    /// with the update. Returns false when no row matched.
    async fn update_credentials(
        &self,
        id: Uuid,
        credentials: &UserCredentials,
        expected_reset_token: Option<&str>,
    ) -> AccountResult<bool>;

    /// Apply a partial update and return the stored result, `None` if no such user.
    async fn update_user(&self, id: Uuid, patch: UserPatch) -> AccountResult<Option<User>>;

    async fn list_users(&self, limit: i64, offset: i64) -> AccountResult<Vec<User>>;
}

const USER_COLUMNS: &str = r#"
    id, username, email, password_hash, name, bio, display_picture,
    user_skills, skills_to_learn, skills_to_teach,
    requests_received, teaching_conversations, learning_conversations, reviews,
    teaching_rating, number_of_ratings,
    password_changed_at, password_reset_token, password_reset_expires, created_at
"#;

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique_violation(e: sqlx::Error) -> AccountError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let what = match db_err.constraint() {
                Some(c) if c.contains("email") => "email",
                Some(c) if c.contains("username") => "username",
                _ => "username or email",
            };
            return AccountError::Conflict(format!("{what} is already taken"));
        }
    }
    AccountError::Persistence(anyhow::Error::new(e).context("save user"))
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_user_by_field(&self, field: &UserField) -> AccountResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = $1",
            field.column()
        );
        let query = sqlx::query_as::<_, User>(&sql);
        let query = match field {
            UserField::Id(id) => query.bind(*id),
            UserField::Username(v) | UserField::Email(v) | UserField::ResetTokenHash(v) => {
                query.bind(v.clone())
            }
        };
        let user = query
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("find user by {}", field.column()))?;
        Ok(user)
    }

    async fn save_user(&self, user: &User) -> AccountResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, email, password_hash, name, bio, display_picture,
                user_skills, skills_to_learn, skills_to_teach,
                requests_received, teaching_conversations, learning_conversations, reviews,
                teaching_rating, number_of_ratings,
                password_changed_at, password_reset_token, password_reset_expires, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                name = EXCLUDED.name,
                bio = EXCLUDED.bio,
                display_picture = EXCLUDED.display_picture,
                user_skills = EXCLUDED.user_skills,
                skills_to_learn = EXCLUDED.skills_to_learn,
                skills_to_teach = EXCLUDED.skills_to_teach,
                requests_received = EXCLUDED.requests_received,
                teaching_conversations = EXCLUDED.teaching_conversations,
                learning_conversations = EXCLUDED.learning_conversations,
                reviews = EXCLUDED.reviews,
                teaching_rating = EXCLUDED.teaching_rating,
                number_of_ratings = EXCLUDED.number_of_ratings,
                password_changed_at = EXCLUDED.password_changed_at,
                password_reset_token = EXCLUDED.password_reset_token,
                password_reset_expires = EXCLUDED.password_reset_expires
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.bio)
        .bind(&user.display_picture)
        .bind(&user.user_skills)
        .bind(&user.skills_to_learn)
        .bind(&user.skills_to_teach)
        .bind(&user.requests_received)
        .bind(&user.teaching_conversations)
        .bind(&user.learning_conversations)
        .bind(&user.reviews)
        .bind(user.teaching_rating)
        .bind(user.number_of_ratings)
        .bind(user.password_changed_at)
        .bind(&user.password_reset_token)
        .bind(user.password_reset_expires)
        .bind(user.created_at)
        .execute(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn update_credentials(
        &self,
        id: Uuid,
        credentials: &UserCredentials,
        expected_reset_token: Option<&str>,
    ) -> AccountResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                password_hash = $2,
                password_changed_at = $3,
                password_reset_token = $4,
                password_reset_expires = $5
            WHERE id = $1
              AND ($6::text IS NULL OR password_reset_token = $6)
            "#,
        )
        .bind(id)
        .bind(&credentials.password_hash)
        .bind(credentials.password_changed_at)
        .bind(&credentials.password_reset_token)
        .bind(credentials.password_reset_expires)
        .bind(expected_reset_token)
        .execute(&self.db)
        .await
        .context("update user credentials")?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> AccountResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users SET
                name = COALESCE($2, name),
                bio = COALESCE($3, bio),
                skills_to_teach = COALESCE($4, skills_to_teach),
                skills_to_learn = COALESCE($5, skills_to_learn),
                user_skills = COALESCE($6, user_skills)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(patch.name)
            .bind(patch.bio)
            .bind(patch.skills_to_teach)
            .bind(patch.skills_to_learn)
            .bind(patch.user_skills)
            .fetch_optional(&self.db)
            .await
            .context("update user")?;
        Ok(user)
    }

    async fn list_users(&self, limit: i64, offset: i64) -> AccountResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, User>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await
            .context("list users")?;
        Ok(rows)
    }
}
