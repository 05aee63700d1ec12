use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::{AccountError, AccountResult};

/// Hash with a fresh random salt. Output is a self-describing PHC string.
pub fn hash_password(plain: &str) -> AccountResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AccountError::Hashing(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// `Ok(false)` for a wrong password, `Err` only when `hash` is not a valid PHC string.
pub fn verify_password(plain: &str, hash: &str) -> AccountResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        AccountError::Hashing(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_hash_is_argon2id_phc() {
        let hash = hash_password("n3w-password").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("n3w-password", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_near_miss() {
        let hash = hash_password("abcdefgh").expect("hashing should succeed");
        assert!(!verify_password("abcdefg1", &hash).expect("verify should not error"));
        assert!(!verify_password("", &hash).expect("verify should not error"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("correct-horse").unwrap();
        let b = hash_password("correct-horse").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("correct-horse"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(matches!(err, AccountError::Hashing(_)));
    }
}
