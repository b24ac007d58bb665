//! Argon2id hashing for client secrets and passwords.
//!
//! Hashes are PHC strings (`$argon2id$...`) with a fresh `OsRng` salt.
//! Plaintext secrets are never stored.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hashes a secret or password for storage.
///
/// # Errors
///
/// Returns `argon2::password_hash::Error` if hashing fails (rare).
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verifies a secret against a stored hash.
///
/// `Ok(false)` on mismatch; `Err` only if the stored hash is malformed.
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    let result = Argon2::default().verify_password(secret.as_bytes(), &parsed_hash);
    Ok(result.is_ok())
}
