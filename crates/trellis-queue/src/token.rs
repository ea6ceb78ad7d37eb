use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::core::CoreGuard;
use crate::error::{QueueError, QueueResult};

/// Token category. Each category has its own budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cat {
    Submit,
    Apply,
    Collect,
    /// Never waits.
    Unlimited,
}

impl fmt::Display for Cat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit => write!(f, "submit"),
            Self::Apply => write!(f, "apply"),
            Self::Collect => write!(f, "collect"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Concurrency limit per bounded category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub submit: usize,
    pub apply: usize,
    pub collect: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            submit: 2,
            apply: 4,
            collect: 4,
        }
    }
}

/// Hands out tokens: permission to hold budget in a category while the
/// core may be released.
pub struct TokenManager {
    submit: Arc<Semaphore>,
    apply: Arc<Semaphore>,
    collect: Arc<Semaphore>,
}

impl TokenManager {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            submit: Arc::new(Semaphore::new(config.submit)),
            apply: Arc::new(Semaphore::new(config.apply)),
            collect: Arc::new(Semaphore::new(config.collect)),
        }
    }

    fn pool(&self, cat: Cat) -> Option<&Arc<Semaphore>> {
        match cat {
            Cat::Submit => Some(&self.submit),
            Cat::Apply => Some(&self.apply),
            Cat::Collect => Some(&self.collect),
            Cat::Unlimited => None,
        }
    }

    /// Take a token, releasing the core while waiting for budget.
    pub async fn acquire(&self, cat: Cat, reason: &str, core: &mut CoreGuard) -> QueueResult<Token> {
        if let Some(token) = self.try_acquire(cat, reason) {
            return Ok(token);
        }
        let Some(pool) = self.pool(cat) else {
            return Err(QueueError::TokensClosed(cat.to_string()));
        };
        debug!(cat = %cat, reason, "waiting for token");
        let permit = core
            .pause(Arc::clone(pool).acquire_owned())
            .await
            .map_err(|_| QueueError::TokensClosed(cat.to_string()))?;
        Ok(Token::new(cat, reason, Some(permit)))
    }

    /// Take a token only if budget is free right now.
    pub fn try_acquire(&self, cat: Cat, reason: &str) -> Option<Token> {
        match self.pool(cat) {
            None => Some(Token::new(cat, reason, None)),
            Some(pool) => Arc::clone(pool)
                .try_acquire_owned()
                .ok()
                .map(|permit| Token::new(cat, reason, Some(permit))),
        }
    }

    /// Free budget in a category. `usize::MAX` for [`Cat::Unlimited`].
    pub fn available(&self, cat: Cat) -> usize {
        self.pool(cat).map_or(usize::MAX, |p| p.available_permits())
    }
}

/// Budget held in one category. Dropping the token returns it.
pub struct Token {
    cat: Cat,
    reason: String,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Token {
    fn new(cat: Cat, reason: &str, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            cat,
            reason: reason.to_string(),
            _permit: permit,
        }
    }

    pub fn cat(&self) -> Cat {
        self.cat
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Run blocking work with the core released, keeping this token.
    pub async fn pseudo_pause<F: Future>(&self, core: &mut CoreGuard, fut: F) -> F::Output {
        debug!(cat = %self.cat, reason = %self.reason, "core released");
        core.pause(fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreLock;
    use std::time::Duration;

    fn config(n: usize) -> TokenConfig {
        TokenConfig {
            submit: n,
            apply: n,
            collect: n,
        }
    }

    #[test]
    fn try_acquire_respects_budget() {
        let tokens = TokenManager::new(&config(1));
        let first = tokens.try_acquire(Cat::Submit, "a").unwrap();
        assert!(tokens.try_acquire(Cat::Submit, "b").is_none());
        assert!(tokens.try_acquire(Cat::Apply, "c").is_some());
        drop(first);
        assert_eq!(tokens.available(Cat::Submit), 1);
    }

    #[test]
    fn unlimited_never_runs_out() {
        let tokens = TokenManager::new(&config(0));
        let _held: Vec<Token> = (0..16)
            .map(|_| tokens.try_acquire(Cat::Unlimited, "x").unwrap())
            .collect();
        assert_eq!(tokens.available(Cat::Unlimited), usize::MAX);
    }

    #[tokio::test]
    async fn acquire_releases_core_while_waiting() {
        let tokens = Arc::new(TokenManager::new(&config(1)));
        let core = CoreLock::new();
        let held = tokens.try_acquire(Cat::Collect, "holder").unwrap();

        let waiter = {
            let tokens = Arc::clone(&tokens);
            let core = core.clone();
            tokio::spawn(async move {
                let mut guard = core.lock().await;
                let token = tokens.acquire(Cat::Collect, "waiter", &mut guard).await.unwrap();
                token.reason().to_string()
            })
        };

        // The waiter must not be sitting on the core.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let guard = tokio::time::timeout(Duration::from_secs(1), core.lock())
            .await
            .expect("core should be free");
        drop(guard);

        drop(held);
        assert_eq!(waiter.await.unwrap(), "waiter");
    }
}
