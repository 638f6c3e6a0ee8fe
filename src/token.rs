use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    models::{Identity, Role},
};

/// The only algorithm this service signs with or accepts.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;
const SIGNING_ALGORITHM_NAME: &str = "HS256";

const REFRESH_TOKEN_BYTES: usize = 32;

/// AccessTokenClaims
///
/// The typed payload of an access token. Decoding fails as a whole if any field is missing
/// or has the wrong type (an unknown role string included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject: the identity id.
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    /// Unique per token, so two tokens minted in the same second still differ.
    pub jti: Uuid,
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    /// Plaintext, handed to the client only.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("JWT signing secret is missing or empty")]
    MissingSecret,
    #[error("failed to sign access token: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signature rejected: {0}")]
    Signature(String),
    #[error("token expired at {0}")]
    Expired(i64),
}

impl TokenError {
    /// Short label for logs. Clients never see it.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::MissingSecret => "missing_secret",
            TokenError::Signing(_) => "signing",
            TokenError::Malformed(_) => "malformed",
            TokenError::Signature(_) => "signature",
            TokenError::Expired(_) => "expired",
        }
    }
}

/// TokenIssuer
///
/// Mints and validates access tokens and mints refresh tokens. Built once at startup from
/// the immutable `AppConfig` and shared read-only (behind `Arc`) by every request.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl TokenIssuer {
    pub fn from_config(config: &AppConfig) -> Result<Self, TokenError> {
        Self::new(
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    pub fn new(
        secret: &str,
        access_token_ttl: Duration,
        refresh_token_ttl: Duration,
    ) -> Result<Self, TokenError> {
        if secret.trim().is_empty() {
            return Err(TokenError::MissingSecret);
        }

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Expiry is checked by hand below: the token must be rejected *at* `exp`,
        // and the library only rejects strictly after it.
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_token_ttl,
            refresh_token_ttl,
        })
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    pub fn issue_access_token(&self, identity: &Identity) -> Result<SignedAccessToken, TokenError> {
        self.issue_access_token_at(identity, Utc::now())
    }

    pub fn issue_access_token_at(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<SignedAccessToken, TokenError> {
        let issued_at = now.timestamp();
        let expires_at = issued_at + self.access_token_ttl.num_seconds();

        let claims = AccessTokenClaims {
            sub: identity.id,
            email: identity.email.clone(),
            role: identity.role,
            iat: issued_at,
            exp: expires_at,
            jti: Uuid::new_v4(),
        };

        let token = encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;

        Ok(SignedAccessToken {
            token,
            expires_at: DateTime::from_timestamp(expires_at, 0).unwrap_or(now),
        })
    }

    pub fn issue_refresh_token(&self) -> IssuedRefreshToken {
        self.issue_refresh_token_at(Utc::now())
    }

    pub fn issue_refresh_token_at(&self, now: DateTime<Utc>) -> IssuedRefreshToken {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        IssuedRefreshToken {
            token: URL_SAFE_NO_PAD.encode(bytes),
            expires_at: now + self.refresh_token_ttl,
        }
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.validate_access_token_at(token, Utc::now())
    }

    pub fn validate_access_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessTokenClaims, TokenError> {
        // Look at the declared algorithm before anything else, so "alg":"none" and
        // algorithm-confusion attempts are reported as signature failures.
        match declared_algorithm(token) {
            None => return Err(TokenError::Malformed("unreadable token header".into())),
            Some(alg) if alg != SIGNING_ALGORITHM_NAME => {
                return Err(TokenError::Signature(format!(
                    "unexpected signing algorithm {alg:?}"
                )));
            }
            Some(_) => {}
        }

        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(classify)?;

        if now.timestamp() >= data.claims.exp {
            return Err(TokenError::Expired(data.claims.exp));
        }

        Ok(data.claims)
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired(0),
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => TokenError::Signature(err.to_string()),
        _ => TokenError::Malformed(err.to_string()),
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

fn declared_algorithm(token: &str) -> Option<String> {
    let segment = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    serde_json::from_slice::<RawHeader>(&bytes)
        .ok()
        .map(|header| header.alg)
}

/// SHA-256 hex digest of a refresh token. The store only ever sees this form.
pub fn digest_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
