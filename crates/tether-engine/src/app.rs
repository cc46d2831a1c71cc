use std::sync::Arc;

use tether_core::storage::StateStorage;

use crate::boundary::{EnvironmentConfigurator, StateRouter};
use crate::view::View;

pub type RenderFn<S> = Arc<dyn Fn(&S) -> View<S> + Send + Sync>;

/// Everything the engine needs to know about an application.
pub struct App<S: Send + Sync + 'static> {
    pub render: RenderFn<S>,
    pub storage: Arc<dyn StateStorage<S>>,
    pub router: Option<Arc<dyn StateRouter<S>>>,
    pub environment: Option<Arc<dyn EnvironmentConfigurator<S>>>,
}

impl<S: Send + Sync + 'static> Clone for App<S> {
    fn clone(&self) -> Self {
        Self {
            render: self.render.clone(),
            storage: self.storage.clone(),
            router: self.router.clone(),
            environment: self.environment.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> App<S> {
    pub fn new<R>(storage: Arc<dyn StateStorage<S>>, render: R) -> Self
    where
        R: Fn(&S) -> View<S> + Send + Sync + 'static,
    {
        Self {
            render: Arc::new(render),
            storage,
            router: None,
            environment: None,
        }
    }

    pub fn with_router(mut self, router: Arc<dyn StateRouter<S>>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentConfigurator<S>>) -> Self {
        self.environment = Some(environment);
        self
    }
}
