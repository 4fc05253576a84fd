use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

pub const SALT_LEN: usize = 16;
const PEPPER_LEN: usize = 32;

/// Load or generate the server-wide password pepper (256-bit random secret).
/// Stored as raw bytes in data_dir/password_pepper.
pub fn load_or_generate_pepper(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let pepper_path = Path::new(data_dir).join("password_pepper");

    if pepper_path.exists() {
        let pepper = std::fs::read(&pepper_path)?;
        if pepper.len() == PEPPER_LEN {
            tracing::info!("Password pepper loaded from {}", pepper_path.display());
            return Ok(pepper);
        }
        // A pepper of the wrong size would silently invalidate every password.
        return Err(format!(
            "password pepper at {} has wrong size ({})",
            pepper_path.display(),
            pepper.len()
        )
        .into());
    }

    let pepper: [u8; PEPPER_LEN] = rand::rng().random();
    std::fs::write(&pepper_path, pepper)?;
    tracing::info!("Password pepper generated at {}", pepper_path.display());
    Ok(pepper.to_vec())
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    rand::rng().random()
}

/// HMAC-SHA256(salt, password), then HMAC-SHA256(pepper, inner).
fn peppered_mac(pepper: &[u8], salt: &[u8], password: &str) -> HmacSha256 {
    let mut inner = HmacSha256::new_from_slice(salt).expect("HMAC accepts any key length");
    inner.update(password.as_bytes());
    let inner = inner.finalize().into_bytes();

    let mut outer = HmacSha256::new_from_slice(pepper).expect("HMAC accepts any key length");
    outer.update(&inner);
    outer
}

pub fn hash_password(pepper: &[u8], salt: &[u8], password: &str) -> Vec<u8> {
    peppered_mac(pepper, salt, password)
        .finalize()
        .into_bytes()
        .to_vec()
}

/// Constant-time comparison of a candidate password against a stored hash.
pub fn verify_password(pepper: &[u8], salt: &[u8], password: &str, expected: &[u8]) -> bool {
    peppered_mac(pepper, salt, password)
        .verify_slice(expected)
        .is_ok()
}
