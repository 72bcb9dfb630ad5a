//! Opaque session tokens held in process memory.
//!
//! Tokens are random v4 UUIDs mapped to the user and an expiry. They do not
//! survive a restart; use the JWT issuer when that matters.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use domains::{DomainError, IssuedToken, Result, TokenIssuer, User, UserId};
use tracing::debug;
use uuid::Uuid;

pub struct SessionTokenIssuer {
    ttl: Duration,
    sessions: DashMap<String, (UserId, DateTime<Utc>)>,
}

impl SessionTokenIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, sessions: DashMap::new() }
    }

    /// Live and expired sessions not yet swept.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops every session that has expired by `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, (_, expires_at)| *expires_at > now);
        before - self.sessions.len()
    }
}

impl TokenIssuer for SessionTokenIssuer {
    fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<IssuedToken> {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = now + self.ttl;
        self.sessions.insert(token.clone(), (user.id, expires_at));
        debug!(user_id = %user.id, "session issued");
        Ok(IssuedToken { token, user_id: user.id, expires_at })
    }

    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<UserId> {
        let (user_id, expires_at) = self
            .sessions
            .get(token)
            .map(|entry| *entry.value())
            .ok_or_else(|| DomainError::Unauthorized("unknown token".into()))?;

        if expires_at <= now {
            self.sessions.remove(token);
            return Err(DomainError::Unauthorized("token expired".into()));
        }
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new("ada".into(), "ada@example.com".into(), String::new(), Utc::now())
    }

    #[test]
    fn test_issue_then_resolve() {
        let issuer = SessionTokenIssuer::new(Duration::hours(1));
        let now = Utc::now();
        let user = user();

        let issued = issuer.issue(&user, now).unwrap();
        assert_eq!(issued.expires_at, now + Duration::hours(1));
        assert_eq!(issuer.resolve(&issued.token, now).unwrap(), user.id);
    }

    #[test]
    fn test_expired_token_is_rejected_and_dropped() {
        let issuer = SessionTokenIssuer::new(Duration::minutes(5));
        let now = Utc::now();
        let issued = issuer.issue(&user(), now).unwrap();

        let err = issuer.resolve(&issued.token, now + Duration::minutes(5)).unwrap_err();
        assert_eq!(err.reason(), "unauthorized");
        assert!(issuer.is_empty());
    }

    #[test]
    fn test_unknown_token_is_unauthorized() {
        let issuer = SessionTokenIssuer::new(Duration::hours(1));
        assert!(matches!(issuer.resolve("nope", Utc::now()), Err(DomainError::Unauthorized(_))));
    }

    #[test]
    fn test_purge_expired() {
        let issuer = SessionTokenIssuer::new(Duration::minutes(1));
        let now = Utc::now();
        issuer.issue(&user(), now).unwrap();
        issuer.issue(&user(), now + Duration::minutes(10)).unwrap();

        assert_eq!(issuer.purge_expired(now + Duration::minutes(2)), 1);
        assert_eq!(issuer.len(), 1);
    }
}
