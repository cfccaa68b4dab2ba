//! Invocation context
//!
//! Every orchestration call receives an [`InvocationContext`] describing who
//! invoked it and carrying that invocation's backend token cache. Callbacks
//! from a backend start a fresh context of their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use strata_core::DataTransferType;
use strata_transfer::AuthToken;

type TokenKey = (DataTransferType, String);

/// Backend tokens obtained during one invocation, keyed by
/// (transfer type, archive configuration id).
#[derive(Clone, Default)]
pub struct TokenCache {
    tokens: Arc<Mutex<HashMap<TokenKey, AuthToken>>>,
}

impl TokenCache {
    pub fn get(&self, transfer_type: DataTransferType, archive_id: &str) -> Option<AuthToken> {
        self.tokens
            .lock()
            .ok()?
            .get(&(transfer_type, archive_id.to_string()))
            .cloned()
    }

    pub fn insert(&self, token: AuthToken) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(
                (token.transfer_type, token.archive_configuration_id.clone()),
                token,
            );
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request-scoped state passed explicitly through every orchestration call.
#[derive(Clone)]
pub struct InvocationContext {
    user_id: String,
    tokens: TokenCache,
}

impl InvocationContext {
    /// New context with an empty token cache.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tokens: TokenCache::default(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_scoped_to_one_context() {
        let first = InvocationContext::new("alice");
        let second = InvocationContext::new("bob");

        first
            .tokens()
            .insert(AuthToken::new(DataTransferType::S3, "s3-archive", "svc", ()));

        assert!(first.tokens().get(DataTransferType::S3, "s3-archive").is_some());
        assert!(first.tokens().get(DataTransferType::Globus, "s3-archive").is_none());
        assert!(second.tokens().is_empty());
    }
}
