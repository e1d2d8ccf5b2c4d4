//! Password hashing for the credential store.
//!
//! Primary scheme is Argon2id (64 MiB, 3 iterations, 4 lanes). Hashes are
//! algorithm-tagged PHC strings, so bcrypt hashes stored for legacy accounts
//! still verify; `needs_rehash` lets the caller transparently upgrade them to
//! Argon2id on the next successful login. bcrypt is verify-only here, the
//! gateway never mints new bcrypt hashes.

use crate::error::AppError;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};

/// Argon2id memory cost in KiB (64 MiB).
const ARGON2_M_COST_KIB: u32 = 65536;
/// Argon2id iteration count.
const ARGON2_T_COST: u32 = 3;
/// Argon2id lane count.
const ARGON2_P_COST: u32 = 4;

const ARGON2ID_PREFIX: &str = "$argon2id$";
const BCRYPT_PREFIX: &str = "$2";

fn argon2_instance() -> Result<Argon2<'static>, AppError> {
    let params = Params::new(ARGON2_M_COST_KIB, ARGON2_T_COST, ARGON2_P_COST, None)
        .map_err(|e| AppError::Internal(format!("Invalid Argon2 params: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password with Argon2id into a PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let argon2 = argon2_instance()?;
    let salt = SaltString::generate(&mut OsRng);

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against an algorithm-tagged stored hash.
///
/// The final hash comparison is constant-time in both schemes (the
/// `password_hash` verifier for Argon2, bcrypt's own comparison for legacy
/// hashes), so verification leaks no timing signal about how close a guess
/// was.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AppError> {
    if stored_hash.starts_with(ARGON2ID_PREFIX) || stored_hash.starts_with("$argon2i$") {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| AppError::Internal(format!("Stored hash is not valid PHC: {}", e)))?;

        // Argon2 parameters are read back from the hash string itself.
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::Internal(format!(
                "Password verification failed: {}",
                e
            ))),
        }
    } else if stored_hash.starts_with(BCRYPT_PREFIX) {
        bcrypt::verify(password, stored_hash)
            .map_err(|e| AppError::Internal(format!("bcrypt verify failed: {}", e)))
    } else {
        Err(AppError::Internal(
            "Stored password hash has an unrecognized algorithm tag".to_string(),
        ))
    }
}

/// True when the stored hash uses anything other than the primary Argon2id
/// scheme and should be re-hashed on the next successful login.
pub fn needs_rehash(stored_hash: &str) -> bool {
    !stored_hash.starts_with(ARGON2ID_PREFIX)
}
