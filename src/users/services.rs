use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::credentials::{check_password_policy, hash_reset_token};
use super::repo::UserRepository;
use super::repo_types::{User, UserField, UserPatch};
use crate::config::CredentialConfig;
use crate::error::{AccountError, AccountResult};
use crate::skills::services::{normalize_skill_names, SkillSynchronizer};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Any printable text up to 30 characters; callers pass it trimmed.
pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[^\p{Cc}]{1,30}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account use-cases called by the auth layer.
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    skills: SkillSynchronizer,
    config: CredentialConfig,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        skills: SkillSynchronizer,
        config: CredentialConfig,
    ) -> Self {
        Self {
            users,
            skills,
            config,
        }
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub fn skills(&self) -> &SkillSynchronizer {
        &self.skills
    }

    fn reset_token_ttl(&self) -> Duration {
        Duration::minutes(self.config.reset_token_ttl_minutes)
    }

    async fn require_user(&self, id: Uuid) -> AccountResult<User> {
        self.users
            .find_user_by_field(&UserField::Id(id))
            .await?
            .ok_or(AccountError::NotFound { entity: "user" })
    }

    pub async fn find_by_id(&self, id: Uuid) -> AccountResult<Option<User>> {
        self.users.find_user_by_field(&UserField::Id(id)).await
    }

    #[instrument(skip(self, password, confirm))]
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm: Option<&str>,
    ) -> AccountResult<User> {
        let username = username.trim();
        let email = normalize_email(email);

        if !is_valid_username(username) {
            warn!(username, "invalid username");
            return Err(AccountError::validation(
                "username must be 1-30 printable characters",
            ));
        }
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AccountError::validation("please provide a valid email"));
        }
        check_password_policy(password, confirm, self.config.password_min_length)?;

        if self
            .users
            .find_user_by_field(&UserField::Username(username.to_string()))
            .await?
            .is_some()
        {
            warn!(username, "username already taken");
            return Err(AccountError::Conflict("username is already taken".into()));
        }
        if self
            .users
            .find_user_by_field(&UserField::Email(email.clone()))
            .await?
            .is_some()
        {
            warn!(email = %email, "email already registered");
            return Err(AccountError::Conflict("email is already taken".into()));
        }

        let mut user = User::new(username, email);
        user.set_password(
            password,
            confirm,
            self.config.password_min_length,
            OffsetDateTime::now_utc(),
        )?;
        self.users.save_user(&user).await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// `Ok(false)` for an unknown email or a wrong password.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AccountResult<bool> {
        let email = normalize_email(email);
        let Some(user) = self
            .users
            .find_user_by_field(&UserField::Email(email.clone()))
            .await?
        else {
            warn!(email = %email, "login unknown email");
            return Ok(false);
        };

        let ok = user.verify_password(password)?;
        if ok {
            info!(user_id = %user.id, "user logged in");
        } else {
            warn!(user_id = %user.id, "login invalid password");
        }
        Ok(ok)
    }

    /// Returns the plaintext token; delivering it is the caller's job.
    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str) -> AccountResult<String> {
        let email = normalize_email(email);
        let mut user = self
            .users
            .find_user_by_field(&UserField::Email(email))
            .await?
            .ok_or(AccountError::NotFound { entity: "user" })?;

        let token = user.issue_password_reset_token(OffsetDateTime::now_utc(), self.reset_token_ttl());
        if !self
            .users
            .update_credentials(user.id, &user.credentials(), None)
            .await?
        {
            return Err(AccountError::NotFound { entity: "user" });
        }

        info!(user_id = %user.id, expires = ?user.password_reset_expires, "password reset issued");
        Ok(token)
    }

    #[instrument(skip(self, token, new_password, confirm))]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirm: Option<&str>,
    ) -> AccountResult<User> {
        let digest = hash_reset_token(token);
        let Some(mut user) = self
            .users
            .find_user_by_field(&UserField::ResetTokenHash(digest.clone()))
            .await?
        else {
            warn!("password reset with unknown token");
            return Err(AccountError::TokenInvalid);
        };

        if let Err(e) = user.consume_reset_token(
            token,
            new_password,
            confirm,
            self.config.password_min_length,
            OffsetDateTime::now_utc(),
        ) {
            warn!(user_id = %user.id, error = %e, "password reset rejected");
            return Err(e);
        }

        // Commits only while our digest is still stored, so a token is spent once.
        if !self
            .users
            .update_credentials(user.id, &user.credentials(), Some(&digest))
            .await?
        {
            warn!(user_id = %user.id, "password reset token already spent");
            return Err(AccountError::TokenInvalid);
        }

        info!(user_id = %user.id, "password reset completed");
        self.require_user(user.id).await
    }

    #[instrument(skip(self, current, new_password, confirm))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new_password: &str,
        confirm: Option<&str>,
    ) -> AccountResult<User> {
        let mut user = self.require_user(user_id).await?;
        if !user.verify_password(current)? {
            warn!(%user_id, "change password with wrong current password");
            return Err(AccountError::InvalidCredentials);
        }

        let changed = user.set_password(
            new_password,
            confirm,
            self.config.password_min_length,
            OffsetDateTime::now_utc(),
        )?;
        if !changed {
            return Ok(user);
        }
        if !self
            .users
            .update_credentials(user_id, &user.credentials(), None)
            .await?
        {
            return Err(AccountError::NotFound { entity: "user" });
        }
        info!(%user_id, "password changed");
        self.require_user(user_id).await
    }

    /// False once the password changed after `token_issued_at` (unix seconds).
    pub fn token_still_valid(&self, user: &User, token_issued_at: i64) -> bool {
        !user.was_password_changed_after(token_issued_at)
    }

    /// Writes the new list to the user record, then brings the catalog in line.
    /// Catalog failures come back as `SynchronizationPartialFailure`; the user
    /// record is already updated at that point and reconciliation repairs the
    /// listed skills.
    #[instrument(skip(self, skills))]
    pub async fn update_teachable_skills(
        &self,
        user_id: Uuid,
        skills: &[String],
    ) -> AccountResult<User> {
        let next = normalize_skill_names(skills);
        let current = self.require_user(user_id).await?;
        let previous = normalize_skill_names(&current.skills_to_teach);

        let patch = UserPatch {
            skills_to_teach: Some(next.clone()),
            ..Default::default()
        };
        let user = self
            .users
            .update_user(user_id, patch)
            .await?
            .ok_or(AccountError::NotFound { entity: "user" })?;

        self.skills
            .sync_teacher(user_id, &previous, &next)
            .await
            .into_result(user_id)?;

        info!(%user_id, skills = next.len(), "teachable skills updated");
        Ok(user)
    }

    /// Learning skills are not indexed in the catalog.
    pub async fn update_learning_skills(
        &self,
        user_id: Uuid,
        skills: &[String],
    ) -> AccountResult<User> {
        let patch = UserPatch {
            skills_to_learn: Some(normalize_skill_names(skills)),
            ..Default::default()
        };
        self.users
            .update_user(user_id, patch)
            .await?
            .ok_or(AccountError::NotFound { entity: "user" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    fn service() -> AccountService {
        AppState::fake().accounts
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn email_and_username_rules() {
        assert!(is_valid_email("ada@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada example.com"));
        assert!(is_valid_username("ada_l.0"));
        assert!(is_valid_username("Ana María"));
        assert!(is_valid_username("ad"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("tab\there"));
        assert!(!is_valid_username(&"x".repeat(31)));
    }

    #[tokio::test]
    async fn register_then_login() {
        let svc = service();
        let user = svc
            .register("ada", "  Ada@Example.COM ", "abcdefgh", Some("abcdefgh"))
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert!(user.password_changed_at.is_none());

        let stored = svc.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.verify_password("abcdefgh").unwrap());
        assert!(!stored.verify_password("abcdefg1").unwrap());

        assert!(svc.login("ADA@example.com", "abcdefgh").await.unwrap());
        assert!(!svc.login("ada@example.com", "abcdefg1").await.unwrap());
        assert!(!svc.login("nobody@example.com", "abcdefgh").await.unwrap());
    }

    #[tokio::test]
    async fn register_validates_before_persisting() {
        let svc = service();
        for (username, email, pw, confirm) in [
            ("ada", "not-an-email", "abcdefgh", None),
            ("ada", "ada@example.com", "short", None),
            ("ada", "ada@example.com", "abcdefgh", Some("abcdefgx")),
            ("   ", "ada@example.com", "abcdefgh", None),
        ] {
            let err = svc.register(username, email, pw, confirm).await.unwrap_err();
            assert!(matches!(err, AccountError::Validation(_)), "{err}");
        }
        assert!(svc.users().list_users(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let svc = service();
        svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();

        let err = svc
            .register("ada", "other@example.com", "abcdefgh", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Conflict(_)));
        let err = svc
            .register("grace", "ADA@example.com", "abcdefgh", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Conflict(_)));
    }

    #[tokio::test]
    async fn password_reset_flow() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();

        let token = svc.request_password_reset("ada@example.com").await.unwrap();
        let stored = svc.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_reset_token, Some(hash_reset_token(&token)));

        let updated = svc
            .reset_password(&token, "n3w-password", Some("n3w-password"))
            .await
            .unwrap();
        assert!(updated.password_reset_token.is_none());
        assert!(updated.password_reset_expires.is_none());
        assert!(updated.password_changed_at.is_some());

        assert!(svc.login("ada@example.com", "n3w-password").await.unwrap());
        assert!(!svc.login("ada@example.com", "abcdefgh").await.unwrap());

        let err = svc.reset_password(&token, "another-pass", None).await.unwrap_err();
        assert!(matches!(err, AccountError::TokenInvalid));
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let token = svc.request_password_reset("ada@example.com").await.unwrap();

        let mut stored = svc.find_by_id(user.id).await.unwrap().unwrap();
        stored.password_reset_expires = Some(OffsetDateTime::now_utc() - Duration::seconds(1));
        svc.users().save_user(&stored).await.unwrap();

        let err = svc.reset_password(&token, "n3w-password", None).await.unwrap_err();
        assert!(matches!(err, AccountError::TokenExpired));
        assert!(svc.login("ada@example.com", "abcdefgh").await.unwrap());
    }

    #[tokio::test]
    async fn reset_for_unknown_email_is_not_found() {
        let svc = service();
        let err = svc.request_password_reset("ghost@example.com").await.unwrap_err();
        assert!(matches!(err, AccountError::NotFound { .. }));
    }

    #[tokio::test]
    async fn change_password_invalidates_older_tokens() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let issued_before = OffsetDateTime::now_utc().unix_timestamp() - 60;
        assert!(svc.token_still_valid(&user, issued_before));

        let err = svc
            .change_password(user.id, "wrong-pass", "n3w-password", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));

        let user = svc
            .change_password(user.id, "abcdefgh", "n3w-password", None)
            .await
            .unwrap();
        assert!(!svc.token_still_valid(&user, issued_before));
        let issued_after = OffsetDateTime::now_utc().unix_timestamp() + 60;
        assert!(svc.token_still_valid(&user, issued_after));
    }

    #[tokio::test]
    async fn changing_to_same_password_keeps_timestamp() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let first = svc
            .change_password(user.id, "abcdefgh", "n3w-password", None)
            .await
            .unwrap();
        let again = svc
            .change_password(user.id, "n3w-password", "n3w-password", None)
            .await
            .unwrap();
        assert_eq!(first.password_changed_at, again.password_changed_at);
        assert_eq!(first.password_hash, again.password_hash);
    }

    #[tokio::test]
    async fn teachable_skills_populate_catalog() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();

        let updated = svc
            .update_teachable_skills(user.id, &names(&["Guitar", " Chess", "Guitar"]))
            .await
            .unwrap();
        assert_eq!(updated.skills_to_teach, names(&["Guitar", "Chess"]));

        for skill in ["Guitar", "Chess"] {
            assert_eq!(svc.skills().teachers_of(skill).await.unwrap(), vec![user.id]);
        }
    }

    #[tokio::test]
    async fn concurrent_identical_updates_add_teacher_once() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let skills = names(&["Guitar", "Chess"]);

        let (a, b) = tokio::join!(
            svc.update_teachable_skills(user.id, &skills),
            svc.update_teachable_skills(user.id, &skills)
        );
        a.unwrap();
        b.unwrap();

        for skill in ["Guitar", "Chess"] {
            assert_eq!(svc.skills().teachers_of(skill).await.unwrap(), vec![user.id]);
        }
    }

    #[tokio::test]
    async fn new_teacher_is_appended_to_existing_set() {
        let svc = service();
        let a = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let b = svc.register("bob", "bob@example.com", "abcdefgh", None).await.unwrap();
        let c = svc.register("cy", "cy@example.com", "abcdefgh", None).await.unwrap();
        let chess = names(&["Chess"]);

        svc.update_teachable_skills(a.id, &chess).await.unwrap();
        svc.update_teachable_skills(b.id, &chess).await.unwrap();
        svc.update_teachable_skills(c.id, &chess).await.unwrap();

        assert_eq!(
            svc.skills().teachers_of("Chess").await.unwrap(),
            vec![a.id, b.id, c.id]
        );
    }

    #[tokio::test]
    async fn learning_skills_do_not_touch_catalog() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let updated = svc
            .update_learning_skills(user.id, &names(&["Rust"]))
            .await
            .unwrap();
        assert_eq!(updated.skills_to_learn, names(&["Rust"]));
        assert!(svc.skills().teachers_of("Rust").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resets_spend_the_token_once() {
        let svc = service();
        svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let token = svc.request_password_reset("ada@example.com").await.unwrap();

        let spawn_reset = |password: &'static str| {
            let svc = svc.clone();
            let token = token.clone();
            tokio::spawn(async move { svc.reset_password(&token, password, None).await })
        };
        let (a, b) = tokio::join!(spawn_reset("first-pass"), spawn_reset("second-pass"));
        let outcomes = [a.unwrap(), b.unwrap()];

        let winners: Vec<_> = outcomes.iter().filter(|r| r.is_ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(AccountError::TokenInvalid))));

        let first = svc.login("ada@example.com", "first-pass").await.unwrap();
        let second = svc.login("ada@example.com", "second-pass").await.unwrap();
        assert!(first ^ second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn password_change_keeps_concurrent_skill_update() {
        let svc = service();
        let user = svc.register("ada", "ada@example.com", "abcdefgh", None).await.unwrap();
        let id = user.id;
        svc.update_teachable_skills(id, &names(&["Guitar"])).await.unwrap();

        let change = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.change_password(id, "abcdefgh", "n3w-password", None).await
            })
        };
        let skills = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.update_teachable_skills(id, &names(&["Chess"])).await
            })
        };
        let (change, skills) = tokio::join!(change, skills);
        change.unwrap().unwrap();
        skills.unwrap().unwrap();

        let stored = svc.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.skills_to_teach, names(&["Chess"]));
        assert!(svc.login("ada@example.com", "n3w-password").await.unwrap());
        assert_eq!(svc.skills().teachers_of("Chess").await.unwrap(), vec![id]);
        assert!(svc.skills().teachers_of("Guitar").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updating_unknown_user_is_not_found() {
        let svc = service();
        let err = svc
            .update_teachable_skills(Uuid::new_v4(), &names(&["Chess"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::NotFound { .. }));
    }
}
