//! Handler factories, registered once and instantiated per exchange.

use std::fmt;
use std::sync::Arc;

use super::chain::HandlerChain;
use super::RequestHandler;

/// Produces a fresh handler instance.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn RequestHandler> + Send + Sync>;

/// Ordered list of handler factories.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: Vec<HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factory. Order of registration is order of consultation.
    pub fn register<F, H>(&mut self, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        self.factories
            .push(Arc::new(move || Box::new(factory()) as Box<dyn RequestHandler>));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F, H>(mut self, factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        self.register(factory);
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate every handler for one exchange.
    pub fn build_chain(&self) -> HandlerChain {
        HandlerChain::new(self.factories.iter().map(|factory| factory()).collect())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.factories.len())
            .finish()
    }
}
