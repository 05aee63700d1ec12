//! Password lifecycle on a [`User`] record.
//!
//! Every method here mutates the in-memory record only. Callers commit the
//! result with a single save, so a failed write never leaves half an update
//! behind in the store.

use rand::RngCore;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::password::{hash_password, verify_password};
use super::repo_types::User;
use crate::error::{AccountError, AccountResult};

const RESET_TOKEN_BYTES: usize = 32;

/// One-way digest stored in place of a reset token.
pub fn hash_reset_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn check_password_policy(
    plain: &str,
    confirm: Option<&str>,
    min_length: usize,
) -> AccountResult<()> {
    if plain.chars().count() < min_length {
        return Err(AccountError::validation(format!(
            "password must be at least {min_length} characters"
        )));
    }
    if let Some(confirm) = confirm {
        if confirm != plain {
            return Err(AccountError::validation("passwords do not match"));
        }
    }
    Ok(())
}

impl User {
    /// Returns `Ok(false)` without touching the record when `plain` already
    /// matches the stored hash.
    ///
    /// `password_changed_at` moves only when an existing password is replaced;
    /// the first password set at registration leaves it empty.
    pub fn set_password(
        &mut self,
        plain: &str,
        confirm: Option<&str>,
        min_length: usize,
        now: OffsetDateTime,
    ) -> AccountResult<bool> {
        check_password_policy(plain, confirm, min_length)?;

        let had_password = self.has_password();
        if had_password && verify_password(plain, &self.password_hash)? {
            debug!(user_id = %self.id, "password unchanged; skipping rehash");
            return Ok(false);
        }

        self.password_hash = hash_password(plain)?;
        if had_password {
            self.password_changed_at = Some(now);
        }
        Ok(true)
    }

    pub fn verify_password(&self, candidate: &str) -> AccountResult<bool> {
        if !self.has_password() {
            return Ok(false);
        }
        verify_password(candidate, &self.password_hash)
    }

    /// Stores the digest and expiry, returns the plaintext for out-of-band delivery.
    /// A previously issued token stops working.
    pub fn issue_password_reset_token(&mut self, now: OffsetDateTime, ttl: Duration) -> String {
        let token = generate_reset_token();
        self.password_reset_token = Some(hash_reset_token(&token));
        self.password_reset_expires = Some(now + ttl);
        token
    }

    pub fn check_reset_token(&self, presented: &str, now: OffsetDateTime) -> AccountResult<()> {
        let Some(stored) = self.password_reset_token.as_deref() else {
            return Err(AccountError::TokenInvalid);
        };
        if hash_reset_token(presented) != stored {
            return Err(AccountError::TokenInvalid);
        }
        match self.password_reset_expires {
            Some(expires) if expires > now => Ok(()),
            _ => Err(AccountError::TokenExpired),
        }
    }

    pub fn clear_reset_token(&mut self) {
        self.password_reset_token = None;
        self.password_reset_expires = None;
    }

    /// Validates the token, sets the new password and clears the token fields.
    /// The token is spent even if the new password equals the old one.
    pub fn consume_reset_token(
        &mut self,
        presented: &str,
        new_password: &str,
        confirm: Option<&str>,
        min_length: usize,
        now: OffsetDateTime,
    ) -> AccountResult<()> {
        self.check_reset_token(presented, now)?;
        self.set_password(new_password, confirm, min_length, now)?;
        self.clear_reset_token();
        Ok(())
    }

    /// `issued_at` is a unix timestamp in seconds, as carried by JWT `iat`.
    pub fn was_password_changed_after(&self, issued_at: i64) -> bool {
        match self.password_changed_at {
            Some(changed) => changed.unix_timestamp() > issued_at,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_password(plain: &str) -> User {
        let mut user = User::new("ada", "ada@example.com");
        user.set_password(plain, Some(plain), 8, OffsetDateTime::now_utc())
            .expect("initial password");
        user
    }

    #[test]
    fn initial_password_does_not_mark_change() {
        let user = user_with_password("abcdefgh");
        assert!(user.has_password());
        assert!(user.password_changed_at.is_none());
        assert!(user.verify_password("abcdefgh").unwrap());
        assert!(!user.verify_password("abcdefg1").unwrap());
    }

    #[test]
    fn policy_rejects_short_and_mismatched() {
        let mut user = User::new("ada", "ada@example.com");
        let now = OffsetDateTime::now_utc();
        let err = user.set_password("short", None, 8, now).unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));
        let err = user
            .set_password("abcdefgh", Some("abcdefgx"), 8, now)
            .unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));
        assert!(!user.has_password());
    }

    #[test]
    fn setting_same_password_twice_is_noop() {
        let mut user = user_with_password("abcdefgh");
        let t1 = OffsetDateTime::now_utc();
        assert!(user.set_password("12345678", None, 8, t1).unwrap());
        assert_eq!(user.password_changed_at, Some(t1));
        let hash = user.password_hash.clone();

        let t2 = t1 + Duration::minutes(5);
        assert!(!user.set_password("12345678", None, 8, t2).unwrap());
        assert_eq!(user.password_changed_at, Some(t1));
        assert_eq!(user.password_hash, hash);
    }

    #[test]
    fn reset_token_is_stored_hashed() {
        let mut user = user_with_password("abcdefgh");
        let now = OffsetDateTime::now_utc();
        let token = user.issue_password_reset_token(now, Duration::minutes(10));

        assert_eq!(token.len(), RESET_TOKEN_BYTES * 2);
        let stored = user.password_reset_token.clone().unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored, hash_reset_token(&token));
        assert_eq!(user.password_reset_expires, Some(now + Duration::minutes(10)));
    }

    #[test]
    fn reset_token_consumed_once() {
        let mut user = user_with_password("abcdefgh");
        let now = OffsetDateTime::now_utc();
        let token = user.issue_password_reset_token(now, Duration::minutes(10));

        user.consume_reset_token(&token, "newpass123", None, 8, now + Duration::minutes(1))
            .unwrap();
        assert!(user.password_reset_token.is_none());
        assert!(user.password_reset_expires.is_none());
        assert!(user.verify_password("newpass123").unwrap());

        let err = user
            .consume_reset_token(&token, "another123", None, 8, now + Duration::minutes(2))
            .unwrap_err();
        assert!(matches!(err, AccountError::TokenInvalid));
    }

    #[test]
    fn wrong_or_missing_token_is_invalid() {
        let mut user = user_with_password("abcdefgh");
        let now = OffsetDateTime::now_utc();
        assert!(matches!(
            user.check_reset_token("anything", now),
            Err(AccountError::TokenInvalid)
        ));

        user.issue_password_reset_token(now, Duration::minutes(10));
        assert!(matches!(
            user.check_reset_token("not-the-token", now),
            Err(AccountError::TokenInvalid)
        ));
    }

    #[test]
    fn reset_token_expires_after_window() {
        let mut user = user_with_password("abcdefgh");
        let now = OffsetDateTime::now_utc();
        let token = user.issue_password_reset_token(now, Duration::minutes(10));

        let late = now + Duration::minutes(10) + Duration::seconds(1);
        let err = user
            .consume_reset_token(&token, "newpass123", None, 8, late)
            .unwrap_err();
        assert!(matches!(err, AccountError::TokenExpired));
        assert!(user.verify_password("abcdefgh").unwrap());
    }

    #[test]
    fn reissue_invalidates_previous_token() {
        let mut user = user_with_password("abcdefgh");
        let now = OffsetDateTime::now_utc();
        let first = user.issue_password_reset_token(now, Duration::minutes(10));
        let second = user.issue_password_reset_token(now, Duration::minutes(10));

        assert!(matches!(
            user.check_reset_token(&first, now),
            Err(AccountError::TokenInvalid)
        ));
        assert!(user.check_reset_token(&second, now).is_ok());
    }

    #[test]
    fn changed_after_compares_seconds() {
        let mut user = user_with_password("abcdefgh");
        assert!(!user.was_password_changed_after(0));

        let changed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        user.password_changed_at = Some(changed);
        assert!(user.was_password_changed_after(1_699_999_999));
        assert!(!user.was_password_changed_after(1_700_000_000));
        assert!(!user.was_password_changed_after(1_700_000_001));
    }
}
