//! Correlation Registry
//!
//! Maps opaque correlation tokens to the request or subscription context
//! that owns them. Tokens are registered before the gateway sees the
//! request, since the gateway may deliver events for a token before the
//! send call returns.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier linking an outgoing request or subscription to its
/// inbound events. Used for routing only, never for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(pub u64);

impl CorrelationToken {
    /// The raw token value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No context is registered for the token. Signals that client and
    /// gateway state have drifted apart.
    #[error("unknown correlation token {0}")]
    NotFound(CorrelationToken),

    /// The token is already bound to an outstanding context.
    #[error("correlation token {0} is already in use")]
    TokenInUse(CorrelationToken),
}

/// Token to context map owned by a single engine.
#[derive(Debug)]
pub struct CorrelationRegistry<C> {
    contexts: HashMap<CorrelationToken, C>,
    next: u64,
}

impl<C> Default for CorrelationRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CorrelationRegistry<C> {
    /// Create an empty registry. Engine-assigned tokens start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: HashMap::new(),
            next: 1,
        }
    }

    /// Allocate a token that is not currently registered.
    pub fn next_token(&mut self) -> CorrelationToken {
        loop {
            let token = CorrelationToken(self.next);
            self.next = self.next.wrapping_add(1);
            if !self.contexts.contains_key(&token) {
                return token;
            }
        }
    }

    /// Bind a token to a context.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TokenInUse`] if the token is outstanding.
    pub fn register(&mut self, token: CorrelationToken, context: C) -> Result<(), RegistryError> {
        if self.contexts.contains_key(&token) {
            return Err(RegistryError::TokenInUse(token));
        }
        self.contexts.insert(token, context);
        Ok(())
    }

    /// Look up the context for a token.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown tokens.
    pub fn resolve(&self, token: CorrelationToken) -> Result<&C, RegistryError> {
        self.contexts
            .get(&token)
            .ok_or(RegistryError::NotFound(token))
    }

    /// Release a token, returning its context if it was registered.
    pub fn unregister(&mut self, token: CorrelationToken) -> Option<C> {
        self.contexts.remove(&token)
    }

    /// Whether the token is currently registered.
    #[must_use]
    pub fn contains(&self, token: CorrelationToken) -> bool {
        self.contexts.contains_key(&token)
    }

    /// Number of outstanding tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no tokens are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}
