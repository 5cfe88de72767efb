// Function directory: routes a function name to the tier responsible for it

use crate::error::DirectoryError;
use crate::types::TierId;
use std::collections::HashMap;

/// Lookup from function name to worker tier.
///
/// `Ok(None)` means the function is not registered. `Err` is reserved for
/// the directory itself failing. Implementations must be deterministic and
/// free of side effects.
pub trait FunctionDirectory: Send + Sync {
    fn resolve(&self, function: &str) -> Result<Option<TierId>, DirectoryError>;
}

/// Caller-constructed, immutable function → tier map
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    routes: HashMap<String, TierId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style route registration; a later route for the same name wins
    pub fn with_route(mut self, function: impl Into<String>, tier: TierId) -> Self {
        self.routes.insert(function.into(), tier);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// All routes, sorted by function name
    pub fn routes(&self) -> Vec<(String, TierId)> {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .map(|(f, t)| (f.clone(), t.clone()))
            .collect();
        routes.sort();
        routes
    }
}

impl FromIterator<(String, TierId)> for StaticDirectory {
    fn from_iter<I: IntoIterator<Item = (String, TierId)>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

impl FunctionDirectory for StaticDirectory {
    fn resolve(&self, function: &str) -> Result<Option<TierId>, DirectoryError> {
        Ok(self.routes.get(function).cloned())
    }
}
