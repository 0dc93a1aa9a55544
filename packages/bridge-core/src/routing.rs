//! Asset-class to application routing
//!
//! Every source event is addressed to the destination application serving
//! its asset class. The table is built once at startup and read-only after.

use std::collections::HashMap;
use thiserror::Error;

use crate::types::{AppId, AssetClass};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no application configured for asset class {0}")]
    MissingRoute(AssetClass),

    #[error("application {0} serves both {1} and {2}")]
    DuplicateApp(AppId, AssetClass, AssetClass),
}

/// Bidirectional mapping between asset classes and application ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRoutes {
    by_class: HashMap<AssetClass, AppId>,
}

impl AppRoutes {
    /// Build a routing table. Every asset class needs exactly one app and an
    /// app may serve only one class.
    pub fn new(
        routes: impl IntoIterator<Item = (AssetClass, AppId)>,
    ) -> Result<Self, RoutingError> {
        let by_class: HashMap<_, _> = routes.into_iter().collect();

        for class in AssetClass::ALL {
            if !by_class.contains_key(&class) {
                return Err(RoutingError::MissingRoute(class));
            }
        }

        for (class, app) in &by_class {
            for (other_class, other_app) in &by_class {
                if class != other_class && app == other_app {
                    return Err(RoutingError::DuplicateApp(*app, *class, *other_class));
                }
            }
        }

        Ok(Self { by_class })
    }

    pub fn app_for(&self, class: AssetClass) -> Option<AppId> {
        self.by_class.get(&class).copied()
    }

    /// Reverse lookup used by the dispatcher
    pub fn class_for(&self, app: &AppId) -> Option<AssetClass> {
        self.by_class
            .iter()
            .find(|(_, candidate)| *candidate == app)
            .map(|(class, _)| *class)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetClass, AppId)> + '_ {
        AssetClass::ALL
            .into_iter()
            .filter_map(|class| self.app_for(class).map(|app| (class, app)))
    }
}
