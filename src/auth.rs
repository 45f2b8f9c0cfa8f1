use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Expert,
    Admin,
}

/// An authenticated principal. The engine trusts it as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Ulid,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Resolves a request credential to a caller.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Caller, EngineError>;
}

/// Fixed token table for development and tests.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: DashMap<String, Caller>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, caller: Caller) {
        self.tokens.insert(token.into(), caller);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Caller, EngineError> {
        self.tokens
            .get(token)
            .map(|c| *c.value())
            .ok_or(EngineError::Unauthorized(Ulid::nil()))
    }
}
