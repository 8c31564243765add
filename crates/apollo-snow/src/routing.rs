//! Dispatch of incoming requests to the consensus instance they address.

use std::collections::HashMap;

use apollo_ids::Id;
use parking_lot::RwLock;
use tracing::debug;

use crate::{ConsensusError, Result};

/// Maps consensus contexts to the services handling them.
#[derive(Debug)]
pub struct Router<S> {
    services: RwLock<HashMap<Id, S>>,
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }
}

impl<S> Router<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `service` to `context`, returning the service it replaces.
    pub fn bind(&self, context: Id, service: S) -> Option<S> {
        debug!(context = %context, "binding context");
        self.services.write().insert(context, service)
    }

    /// Removes the service bound to `context`.
    pub fn unbind(&self, context: &Id) -> Option<S> {
        debug!(context = %context, "unbinding context");
        self.services.write().remove(context)
    }

    pub fn contains(&self, context: &Id) -> bool {
        self.services.read().contains_key(context)
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Runs `f` against the service bound to `context`.
    ///
    /// Fails with [`ConsensusError::NotFound`] when the request carries no
    /// context or the context is unbound. A missing context is reported as
    /// [`Id::EMPTY`].
    pub fn evaluate<R>(&self, context: Option<Id>, f: impl FnOnce(&S) -> R) -> Result<R> {
        let context = context.ok_or(ConsensusError::NotFound(Id::EMPTY))?;
        let services = self.services.read();
        let service = services
            .get(&context)
            .ok_or(ConsensusError::NotFound(context))?;
        Ok(f(service))
    }
}

impl<S: Clone> Router<S> {
    /// Returns a clone of the service bound to `context`, for use across an
    /// await point.
    pub fn get(&self, context: Option<Id>) -> Result<S> {
        self.evaluate(context, S::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    #[test]
    fn test_bind_and_evaluate() {
        let router = Router::new();
        assert!(router.bind(ctx(1), "chain-one").is_none());
        assert_eq!(router.bind(ctx(1), "chain-uno"), Some("chain-one"));

        assert_eq!(router.evaluate(Some(ctx(1)), |s| s.len()), Ok(9));
        assert_eq!(router.get(Some(ctx(1))), Ok("chain-uno"));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_unbound_context_is_not_found() {
        let router: Router<u32> = Router::new();
        router.bind(ctx(1), 7);

        assert_eq!(
            router.evaluate(Some(ctx(2)), |v| *v),
            Err(ConsensusError::NotFound(ctx(2)))
        );
        assert_eq!(
            router.evaluate(None, |v| *v),
            Err(ConsensusError::NotFound(Id::EMPTY))
        );

        assert_eq!(router.unbind(&ctx(1)), Some(7));
        assert!(!router.contains(&ctx(1)));
        assert!(router.is_empty());
        assert!(router.evaluate(Some(ctx(1)), |v| *v).is_err());
    }
}
