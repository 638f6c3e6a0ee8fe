use thiserror::Error;

/// bcrypt cost used when nothing else is configured.
pub const DEFAULT_COST: u32 = 10;

/// bcrypt only reads the first 72 bytes of its input. Longer passwords are refused
/// instead of being silently cut down to a shared prefix.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PasswordError {
    /// The plaintext does not match the digest. An expected outcome, not a fault.
    #[error("password does not match")]
    Mismatch,
    #[error("stored password digest is malformed: {0}")]
    InvalidDigest(String),
    #[error("password is {0} bytes, the limit is 72")]
    TooLong(usize),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// PasswordHasher
///
/// One-way bcrypt hashing. The salt lives inside the digest, so callers store a single
/// string. `dummy_digest` is a digest of a throwaway value with the same cost, verified
/// against when the account does not exist so both login failure paths cost the same.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_digest: String,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self, PasswordError> {
        let dummy_digest = bcrypt::hash("timing-equalization-placeholder", cost)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(Self { cost, dummy_digest })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return Err(PasswordError::TooLong(plaintext.len()));
        }
        bcrypt::hash(plaintext, self.cost).map_err(|e| PasswordError::Hashing(e.to_string()))
    }

    /// verify
    ///
    /// An over-long plaintext is a `Mismatch` even when its first 72 bytes match the
    /// digest. The bcrypt round still runs first so the rejection costs the same.
    pub fn verify(&self, digest: &str, plaintext: &str) -> Result<(), PasswordError> {
        let outcome = bcrypt::verify(plaintext, digest);
        if plaintext.len() > MAX_PASSWORD_BYTES && outcome.is_ok() {
            return Err(PasswordError::Mismatch);
        }
        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(PasswordError::Mismatch),
            Err(bcrypt::BcryptError::InvalidHash(reason)) => Err(PasswordError::InvalidDigest(reason)),
            Err(err) => Err(PasswordError::Hashing(err.to_string())),
        }
    }

    /// Burns one verification against the placeholder digest. Always a mismatch.
    pub fn verify_dummy(&self, plaintext: &str) {
        let _ = bcrypt::verify(plaintext, &self.dummy_digest);
    }
}
