use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tokio::task;
use tracing::error;

/// Hashes with a fresh random salt and the crate's fixed Argon2id parameters.
/// Runs on the blocking pool.
pub async fn hash_password(plain: &str) -> anyhow::Result<String> {
    let plain = plain.to_owned();
    task::spawn_blocking(move || hash_blocking(&plain)).await?
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash cannot be parsed.
pub async fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let plain = plain.to_owned();
    let hash = hash.to_owned();
    task::spawn_blocking(move || verify_blocking(&plain, &hash)).await?
}

/// Salt of a stored hash. Every new hash gets a fresh salt, so this changes
/// whenever the password is set.
pub fn credential_fingerprint(hash: &str) -> anyhow::Result<String> {
    let parsed = parse(hash)?;
    parsed
        .salt
        .map(|s| s.as_str().to_owned())
        .ok_or_else(|| anyhow::anyhow!("stored hash has no salt"))
}

fn hash_blocking(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn verify_blocking(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = parse(hash)?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

fn parse(hash: &str) -> anyhow::Result<PasswordHash<'_>> {
    PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })
}
