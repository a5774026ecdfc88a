//! Ephemeral check-in tokens.
//!
//! A presenter mints a token bound to a (course, group) pair; participants
//! present it to check themselves in until it expires. Tokens live only in
//! memory for the lifetime of the [`SessionTokenStore`] that issued them.
//!
//! # Concurrency
//!
//! The token table and the random source share one [`Mutex`]. Every operation
//! takes the lock once, so the expiry check in [`SessionTokenStore::validate`]
//! and the eviction of an expired entry are atomic with respect to concurrent
//! `issue`, `sweep` and `validate` calls. No I/O happens under the lock.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::clock::Clock;
use crate::error::ErrorKind;
use crate::types::{CourseId, GroupId, UserId, ValidationError};

/// Random bytes per generated token (64 hex characters).
pub const TOKEN_BYTES: usize = 32;

/// Shortest accepted token: 128 bits.
const MIN_TOKEN_HEX_LEN: usize = 32;
const MAX_TOKEN_HEX_LEN: usize = 128;

/// Query parameter that carries the token in a check-in URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Converts a validity given in minutes, rejecting values that are not
/// positive or that overflow a [`Duration`].
pub fn validity_from_minutes(minutes: i64) -> Result<Duration, ValidationError> {
    Duration::try_minutes(minutes)
        .filter(|validity| *validity > Duration::zero())
        .ok_or(ValidationError::InvalidValidity { minutes })
}

/// An opaque, unguessable check-in token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut buf = [0u8; TOKEN_BYTES];
        rng.fill_bytes(&mut buf);
        Self(hex::encode(buf))
    }

    /// Parses a presented token, normalizing to lowercase hex.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        if !(MIN_TOKEN_HEX_LEN..=MAX_TOKEN_HEX_LEN).contains(&s.len()) || hex::decode(s).is_err() {
            return Err(ValidationError::MalformedToken);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short prefix safe to put in logs.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.short())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0
    }
}

/// What a token authorizes: check-in to one course for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBinding {
    pub course: CourseId,
    pub group: GroupId,
    pub issuer: UserId,
}

/// A freshly minted token and its validity window.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: SessionToken,
    #[serde(flatten)]
    pub binding: TokenBinding,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is not in the store.
    #[error("invalid check-in token")]
    Invalid,
    /// The token was found but its window has closed. It has been evicted.
    #[error("check-in token expired at {expires_at}")]
    Expired { expires_at: DateTime<Utc> },
}

impl TokenError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid => ErrorKind::InvalidToken,
            Self::Expired { .. } => ErrorKind::ExpiredToken,
        }
    }
}

#[derive(Debug)]
struct TokenEntry {
    binding: TokenBinding,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

struct Inner<R> {
    tokens: HashMap<SessionToken, TokenEntry>,
    rng: R,
}

/// In-memory table of outstanding check-in tokens.
///
/// Construct one per process and share it by reference (or `Arc`) with every
/// request handler.
pub struct SessionTokenStore<R = OsRng> {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<R>>,
}

impl SessionTokenStore<OsRng> {
    /// Creates an empty store drawing randomness from the OS CSPRNG.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(clock, OsRng)
    }
}

impl<R: RngCore> SessionTokenStore<R> {
    /// Creates an empty store with an explicit random source.
    pub fn with_rng(clock: Arc<dyn Clock>, rng: R) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner {
                tokens: HashMap::new(),
                rng,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        // The table is left consistent after every statement, so a panic in
        // another holder does not invalidate it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mints a token valid for `validity` from now.
    ///
    /// Expired entries are swept before the new one is inserted.
    pub fn issue(
        &self,
        course: CourseId,
        group: GroupId,
        issuer: UserId,
        validity: Duration,
    ) -> Result<IssuedToken, ValidationError> {
        if validity <= Duration::zero() {
            return Err(ValidationError::InvalidValidity {
                minutes: validity.num_minutes(),
            });
        }
        let issued_at = self.clock.now();
        let expires_at = issued_at.checked_add_signed(validity).ok_or(
            ValidationError::InvalidValidity {
                minutes: validity.num_minutes(),
            },
        )?;
        let binding = TokenBinding {
            course,
            group,
            issuer,
        };

        let mut inner = self.lock();
        let swept = sweep_expired(&mut inner.tokens, issued_at);
        if swept > 0 {
            tracing::debug!(swept, "swept expired tokens");
        }
        let token = loop {
            let candidate = SessionToken::generate(&mut inner.rng);
            if let Entry::Vacant(slot) = inner.tokens.entry(candidate.clone()) {
                slot.insert(TokenEntry {
                    binding: binding.clone(),
                    issued_at,
                    expires_at,
                });
                break candidate;
            }
        };
        drop(inner);

        tracing::info!(
            token = token.short(),
            course = %binding.course,
            group = %binding.group,
            issuer = %binding.issuer,
            %expires_at,
            "issued check-in token"
        );
        Ok(IssuedToken {
            token,
            binding,
            issued_at,
            expires_at,
        })
    }

    /// Resolves a token to its binding.
    ///
    /// Success leaves the entry in place: a token may be presented any number
    /// of times until it expires. An expired entry is removed under the same
    /// lock acquisition that detected the expiry.
    pub fn validate(&self, token: &SessionToken) -> Result<TokenBinding, TokenError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Some(entry) = inner.tokens.get(token) else {
            tracing::debug!(token = token.short(), "unknown check-in token");
            return Err(TokenError::Invalid);
        };
        if now >= entry.expires_at {
            let expires_at = entry.expires_at;
            inner.tokens.remove(token);
            tracing::debug!(token = token.short(), %expires_at, "evicted expired check-in token");
            return Err(TokenError::Expired { expires_at });
        }
        if now < entry.issued_at {
            return Err(TokenError::Invalid);
        }
        Ok(entry.binding.clone())
    }

    /// Removes every entry whose expiry is strictly before now.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let swept = sweep_expired(&mut self.lock().tokens, now);
        if swept > 0 {
            tracing::debug!(swept, "swept expired tokens");
        }
        swept
    }

    /// Deletes a token before its expiry. Returns whether it existed.
    pub fn revoke(&self, token: &SessionToken) -> bool {
        let removed = self.lock().tokens.remove(token).is_some();
        if removed {
            tracing::info!(token = token.short(), "revoked check-in token");
        }
        removed
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep_expired(tokens: &mut HashMap<SessionToken, TokenEntry>, now: DateTime<Utc>) -> usize {
    let before = tokens.len();
    tokens.retain(|_, entry| entry.expires_at >= now);
    before - tokens.len()
}

/// Builds the participant-facing check-in link for `token`.
///
/// Any existing `token` parameter on `base` is replaced; other parameters are
/// kept in order.
pub fn check_in_url(base: &Url, token: &SessionToken) -> Url {
    let retained: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != TOKEN_QUERY_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(TOKEN_QUERY_PARAM, token.as_str());
    url
}

/// Extracts the token from a check-in link built by [`check_in_url`].
pub fn token_from_url(url: &Url) -> Result<SessionToken, ValidationError> {
    url.query_pairs()
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .ok_or(ValidationError::MalformedToken)
        .and_then(|(_, value)| SessionToken::parse(&value))
}
