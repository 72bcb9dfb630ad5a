//! HS256-signed bearer tokens.
//!
//! Expiry is checked against the caller's `now` rather than the system
//! clock, so the engine's clock stays the single source of time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use domains::{DomainError, IssuedToken, Result, TokenIssuer, User, UserId};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct JwtTokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtTokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<IssuedToken> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DomainError::Invariant(format!("failed to sign token: {e}")))?;

        Ok(IssuedToken { token, user_id: user.id, expires_at })
    }

    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<UserId> {
        let data = decode::<Claims>(token, &self.decoding, &Self::validation()).map_err(|err| {
            let msg = match err.kind() {
                ErrorKind::InvalidSignature => "invalid signature",
                ErrorKind::InvalidToken => "invalid token",
                _ => "token validation failed",
            };
            DomainError::Unauthorized(msg.into())
        })?;

        let expires_at = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or_else(|| DomainError::Unauthorized("invalid expiry".into()))?;
        if expires_at <= now {
            return Err(DomainError::Unauthorized("token expired".into()));
        }

        Uuid::parse_str(&data.claims.sub)
            .map(UserId)
            .map_err(|_| DomainError::Unauthorized("invalid subject".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-that-is-long-enough-for-hs256";

    fn user() -> User {
        User::new("ada".into(), "ada@example.com".into(), String::new(), Utc::now())
    }

    #[test]
    fn test_round_trip_resolves_user() {
        let issuer = JwtTokenIssuer::new(SECRET, Duration::seconds(86_400));
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let user = user();

        let issued = issuer.issue(&user, now).unwrap();
        assert_eq!(issued.expires_at, now + Duration::days(1));
        assert_eq!(issuer.resolve(&issued.token, now + Duration::hours(23)).unwrap(), user.id);
    }

    #[test]
    fn test_expired_against_caller_clock() {
        let issuer = JwtTokenIssuer::new(SECRET, Duration::seconds(60));
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let issued = issuer.issue(&user(), now).unwrap();

        let err = issuer.resolve(&issued.token, now + Duration::seconds(61)).unwrap_err();
        assert_eq!(err, DomainError::Unauthorized("token expired".into()));
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let issuer = JwtTokenIssuer::new(SECRET, Duration::seconds(60));
        let other = JwtTokenIssuer::new(b"a-completely-different-signing-secret!!", Duration::seconds(60));
        let now = Utc::now();
        let issued = other.issue(&user(), now).unwrap();

        assert!(matches!(issuer.resolve(&issued.token, now), Err(DomainError::Unauthorized(_))));
    }
}
