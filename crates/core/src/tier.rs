// Worker tiers: the executor contract plus an in-process tier pool

use crate::directory::FunctionDirectory;
use crate::error::{DirectoryError, InvocationError, RegistryError};
use crate::types::{Parameters, TierId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Boundary to wherever stage functions actually run.
///
/// Must be safe to call concurrently; the engine imposes no ordering or
/// mutual exclusion between invocations on the same or different tiers.
#[async_trait::async_trait]
pub trait WorkerTierExecutor: Send + Sync {
    async fn invoke(
        &self,
        tier: &TierId,
        function: &str,
        params: &Parameters,
    ) -> Result<serde_json::Value, InvocationError>;
}

/// A callable stage function
#[async_trait::async_trait]
pub trait StageFunction: Send + Sync {
    async fn call(&self, params: Parameters) -> anyhow::Result<serde_json::Value>;
}

/// Adapts an async closure into a [`StageFunction`]
pub struct FnFunction<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> StageFunction for FnFunction<F>
where
    F: Fn(Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    async fn call(&self, params: Parameters) -> anyhow::Result<serde_json::Value> {
        (self.0)(params).await
    }
}

/// A registered function and the tier it belongs to
#[derive(Clone)]
pub struct Registration {
    pub tier: TierId,
    handler: Arc<dyn StageFunction>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

/// Explicit function registry. Doubles as a [`FunctionDirectory`].
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Registration>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function handle on a tier
    pub fn register(
        &mut self,
        name: impl Into<String>,
        tier: TierId,
        handler: Arc<dyn StageFunction>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.functions.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }

        tracing::debug!("Registered function {} on tier {}", name, tier);
        self.functions.insert(name, Registration { tier, handler });
        Ok(())
    }

    /// Register an async closure on a tier
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        tier: TierId,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(Parameters) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.register(name, tier, Arc::new(FnFunction(f)))
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.functions.get(name)
    }

    /// All (function, tier) pairs sorted by function name
    pub fn functions(&self) -> Vec<(String, TierId)> {
        let mut functions: Vec<_> = self
            .functions
            .iter()
            .map(|(name, reg)| (name.clone(), reg.tier.clone()))
            .collect();
        functions.sort();
        functions
    }

    /// Distinct tiers referenced by registrations
    pub fn tiers(&self) -> Vec<TierId> {
        self.functions
            .values()
            .map(|reg| reg.tier.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl FunctionDirectory for FunctionRegistry {
    fn resolve(&self, function: &str) -> Result<Option<TierId>, DirectoryError> {
        Ok(self.functions.get(function).map(|reg| reg.tier.clone()))
    }
}

/// Per-tier pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_max_concurrency() -> usize {
    8
}

impl TierConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_concurrency: default_max_concurrency(),
            timeout_secs: None,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

struct TierSlot {
    config: TierConfig,
    permits: Arc<Semaphore>,
}

/// In-process worker tiers backed by a [`FunctionRegistry`].
///
/// Each tier bounds its concurrent invocations with a semaphore and may
/// enforce a per-invocation timeout.
pub struct LocalTierPool {
    registry: Arc<FunctionRegistry>,
    tiers: HashMap<TierId, TierSlot>,
}

impl LocalTierPool {
    pub fn new(registry: Arc<FunctionRegistry>, tiers: Vec<TierConfig>) -> Self {
        let tiers = tiers
            .into_iter()
            .map(|config| {
                // A zero-permit tier would never run anything
                let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
                (TierId::new(config.name.clone()), TierSlot { config, permits })
            })
            .collect();

        Self { registry, tiers }
    }

    /// Pool with one default-configured tier per tier named in the registry
    pub fn with_default_tiers(registry: Arc<FunctionRegistry>) -> Self {
        let tiers = registry
            .tiers()
            .into_iter()
            .map(|tier| TierConfig::new(tier.0))
            .collect();
        Self::new(registry, tiers)
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn tier_configs(&self) -> Vec<&TierConfig> {
        let mut configs: Vec<_> = self.tiers.values().map(|slot| &slot.config).collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }
}

#[async_trait::async_trait]
impl WorkerTierExecutor for LocalTierPool {
    async fn invoke(
        &self,
        tier: &TierId,
        function: &str,
        params: &Parameters,
    ) -> Result<serde_json::Value, InvocationError> {
        let slot = self
            .tiers
            .get(tier)
            .ok_or_else(|| InvocationError::UnknownTier(tier.clone()))?;

        let registration = self
            .registry
            .get(function)
            .ok_or_else(|| InvocationError::FunctionNotFound(function.to_string()))?;

        if &registration.tier != tier {
            return Err(InvocationError::WrongTier {
                function: function.to_string(),
                tier: tier.clone(),
            });
        }

        let _permit = slot
            .permits
            .acquire()
            .await
            .map_err(|e| InvocationError::Unavailable {
                tier: tier.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!("Invoking {} on tier {}", function, tier);

        let call = registration.handler.call(params.clone());

        match slot.config.timeout_secs {
            Some(timeout_secs) => {
                match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
                    Ok(result) => result.map_err(InvocationError::from),
                    Err(_) => {
                        tracing::warn!("Function {} timed out on tier {}", function, tier);
                        Err(InvocationError::Timeout {
                            function: function.to_string(),
                            tier: tier.clone(),
                            timeout_secs,
                        })
                    }
                }
            }
            None => call.await.map_err(InvocationError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry
            .register_fn("echo", TierId::new("light"), |params| async move {
                Ok::<_, anyhow::Error>(serde_json::json!(params))
            })
            .unwrap();
        registry
            .register_fn("boom", TierId::new("light"), |_| async move {
                Err::<serde_json::Value, _>(anyhow::anyhow!("exploded"))
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = echo_registry();
        let err = registry
            .register_fn("echo", TierId::new("heavy"), |_| async move {
                Ok::<_, anyhow::Error>(serde_json::Value::Null)
            })
            .unwrap_err();

        assert!(matches!(err, RegistryError::AlreadyRegistered(name) if name == "echo"));
        assert_eq!(
            registry.resolve("echo").unwrap(),
            Some(TierId::new("light"))
        );
    }

    #[test]
    fn test_registry_listing() {
        let registry = echo_registry();

        assert_eq!(registry.tiers(), vec![TierId::new("light")]);
        assert_eq!(
            registry.functions(),
            vec![
                ("boom".to_string(), TierId::new("light")),
                ("echo".to_string(), TierId::new("light")),
            ]
        );
        assert!(registry.resolve("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invoke_success_and_failure() {
        let pool = LocalTierPool::with_default_tiers(Arc::new(echo_registry()));
        let mut params = Parameters::new();
        params.insert("x".to_string(), serde_json::json!(1));

        let value = pool
            .invoke(&TierId::new("light"), "echo", &params)
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({ "x": 1 }));

        let err = pool
            .invoke(&TierId::new("light"), "boom", &params)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "exploded");
    }

    #[tokio::test]
    async fn test_invoke_routing_errors() {
        let pool = LocalTierPool::new(
            Arc::new(echo_registry()),
            vec![TierConfig::new("light"), TierConfig::new("heavy")],
        );
        let params = Parameters::new();

        let err = pool
            .invoke(&TierId::new("gpu"), "echo", &params)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::UnknownTier(_)));

        let err = pool
            .invoke(&TierId::new("heavy"), "echo", &params)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::WrongTier { .. }));

        let err = pool
            .invoke(&TierId::new("light"), "nope", &params)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::FunctionNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_timeout() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_fn("slow", TierId::new("batch"), |_| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, anyhow::Error>(serde_json::Value::Null)
            })
            .unwrap();

        let pool = LocalTierPool::new(
            Arc::new(registry),
            vec![TierConfig::new("batch").with_timeout_secs(1)],
        );

        let err = pool
            .invoke(&TierId::new("batch"), "slow", &Parameters::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InvocationError::Timeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_tier_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut registry = FunctionRegistry::new();
        {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            registry
                .register_fn("work", TierId::new("narrow"), move |_| {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(serde_json::Value::Null)
                    }
                })
                .unwrap();
        }

        let pool = LocalTierPool::new(
            Arc::new(registry),
            vec![TierConfig::new("narrow").with_max_concurrency(2)],
        );
        let tier = TierId::new("narrow");
        let params = Parameters::new();

        let calls = (0..6).map(|_| pool.invoke(&tier, "work", &params));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }
}
