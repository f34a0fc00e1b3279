use std::sync::Arc;

use crate::core::config::Settings;
use crate::engine::registry::SessionRegistry;
use crate::store::Stores;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    stores: Stores,
    registry: SessionRegistry,
}

impl AppState {
    pub(crate) fn new(settings: Settings, stores: Stores) -> Self {
        Self {
            inner: Arc::new(InnerState {
                settings,
                stores,
                registry: SessionRegistry::new(),
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }
}
