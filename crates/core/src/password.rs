//! Password policy, generated credentials, and salted digests.
//!
//! Digest format is `salt$hex(sha256(salt || password))`. A real identity
//! provider would own this; the control plane only needs enough to provision
//! tenant admins and drive the reset flow.

use crate::error::{PlatformError, PlatformResult};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+";

/// Password requirements applied at signup, reset, and generation.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicy {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_true")]
    pub require_uppercase: bool,
    #[serde(default = "default_true")]
    pub require_digit: bool,
    #[serde(default = "default_true")]
    pub require_symbol: bool,
}

fn default_min_length() -> usize {
    12
}
fn default_true() -> bool {
    true
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            require_uppercase: true,
            require_digit: true,
            require_symbol: true,
        }
    }
}

impl PasswordPolicy {
    /// Validate a candidate password against the policy.
    pub fn validate(&self, candidate: &str) -> PlatformResult<()> {
        if candidate.len() < self.min_length {
            return Err(PlatformError::Validation(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }
        if self.require_uppercase && !candidate.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(PlatformError::Validation(
                "Password must contain an uppercase letter".into(),
            ));
        }
        if self.require_digit && !candidate.chars().any(|c| c.is_ascii_digit()) {
            return Err(PlatformError::Validation(
                "Password must contain a digit".into(),
            ));
        }
        if self.require_symbol && !candidate.chars().any(|c| SYMBOLS.contains(&(c as u8))) {
            return Err(PlatformError::Validation(
                "Password must contain a symbol".into(),
            ));
        }
        Ok(())
    }

    /// Generate a random password satisfying the policy.
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let len = self.min_length.max(12);
        let mut chars: Vec<u8> = Vec::with_capacity(len);
        // One of each required class, then fill from the full pool.
        chars.push(UPPER[rng.gen_range(0..UPPER.len())]);
        chars.push(DIGITS[rng.gen_range(0..DIGITS.len())]);
        chars.push(SYMBOLS[rng.gen_range(0..SYMBOLS.len())]);
        let pool: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();
        while chars.len() < len {
            chars.push(pool[rng.gen_range(0..pool.len())]);
        }
        // Shuffle so the class characters are not positional.
        for i in (1..chars.len()).rev() {
            let j = rng.gen_range(0..=i);
            chars.swap(i, j);
        }
        String::from_utf8(chars).unwrap_or_default()
    }
}

/// Hash a password with a fresh random salt.
pub fn digest(password: &str) -> String {
    let mut rng = rand::thread_rng();
    let salt: String = (0..16)
        .map(|_| LOWER[rng.gen_range(0..LOWER.len())] as char)
        .collect();
    format!("{salt}${}", salted_hex(&salt, password))
}

/// Verify a password against a stored digest.
pub fn verify(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, hash)) => salted_hex(salt, password) == hash,
        None => false,
    }
}

/// Opaque token for password resets and invitations.
pub fn reset_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 24] = rng.gen();
    hex::encode(bytes)
}

fn salted_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_validation() {
        let policy = PasswordPolicy::default();
        assert!(policy.validate("short").is_err());
        assert!(policy.validate("alllowercaseword").is_err());
        assert!(policy.validate("NoDigitsHere!!").is_err());
        assert!(policy.validate("NoSymbols123abc").is_err());
        assert!(policy.validate("Sound-Password-42").is_ok());
    }

    #[test]
    fn test_generated_passwords_satisfy_policy() {
        let policy = PasswordPolicy::default();
        for _ in 0..50 {
            let pw = policy.generate();
            policy.validate(&pw).unwrap();
        }
    }

    #[test]
    fn test_digest_roundtrip() {
        let stored = digest("Sound-Password-42");
        assert!(verify("Sound-Password-42", &stored));
        assert!(!verify("wrong", &stored));
        // Distinct salts produce distinct digests.
        assert_ne!(stored, digest("Sound-Password-42"));
    }

    #[test]
    fn test_reset_tokens_unique() {
        assert_ne!(reset_token(), reset_token());
        assert_eq!(reset_token().len(), 48);
    }
}
