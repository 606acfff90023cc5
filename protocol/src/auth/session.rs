//! # Session Tokens
//!
//! Sessions are stateless HS256 JWTs. The server keeps nothing; a token is
//! valid if its MAC checks out under the shared secret and the injected
//! clock says it has not expired.
//!
//! `jsonwebtoken`'s own `exp` check reads the system clock, so it is turned
//! off and expiry is evaluated here against [`Clock`] instead.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clock::{add_duration, Clock};
use crate::config::MIN_SESSION_SECRET_LENGTH;
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad MAC, malformed token, wrong algorithm. Not distinguished further.
    #[error("invalid session token")]
    Invalid,

    #[error("session expired")]
    Expired,

    #[error("session secret must be at least {MIN_SESSION_SECRET_LENGTH} bytes")]
    WeakSecret,

    #[error("session token could not be encoded")]
    Encoding,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Invalid | SessionError::Expired => ErrorKind::Auth,
            SessionError::WeakSecret | SessionError::Encoding => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Invalid => "INVALID_SESSION",
            SessionError::Expired => "SESSION_EXPIRED",
            SessionError::WeakSecret => "WEAK_SESSION_SECRET",
            SessionError::Encoding => "SESSION_ENCODING_FAILED",
        }
    }
}

/// A verified session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Token id (`jti`). Also used as the default submission label.
    pub id: String,
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What a successful login hands back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub token: String,
    pub session: Session,
    /// Seconds until expiry.
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
    scope: String,
    jti: String,
}

/// Signs and verifies session tokens with a shared secret.
pub struct SessionCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionCodec {
    pub fn new(secret: &[u8], ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, SessionError> {
        if secret.len() < MIN_SESSION_SECRET_LENGTH {
            return Err(SessionError::WeakSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            clock,
        })
    }

    /// Issue a session for `subject` valid for the configured TTL.
    pub fn issue(&self, subject: &str, scope: &str) -> Result<SessionGrant, SessionError> {
        // JWT timestamps are whole seconds; truncate so the returned session
        // equals what `verify` will decode.
        let now = timestamp(self.clock.now().timestamp());
        let expires_at = add_duration(now, self.ttl);
        let claims = SessionClaims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            scope: scope.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| SessionError::Encoding)?;

        Ok(SessionGrant {
            token,
            expires_in: self.ttl.as_secs(),
            session: Session {
                id: claims.jti,
                subject: claims.sub,
                issued_at: now,
                expires_at,
                scope: claims.scope,
            },
        })
    }

    /// Check the MAC and expiry of `token`.
    pub fn verify(&self, token: &str) -> Result<Session, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|_| SessionError::Invalid)?;
        let claims = data.claims;

        let session = Session {
            id: claims.jti,
            subject: claims.sub,
            issued_at: timestamp(claims.iat),
            expires_at: timestamp(claims.exp),
            scope: claims.scope,
        };
        if session.is_expired_at(self.clock.now()) {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
