//! Optional integrations looked up by capability.

use std::sync::Arc;

use dashmap::DashMap;
use waystone_world::{Home, TeleportKind, User, Warp};

/// Capability a hook provides. At most one hook per kind is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Map,
    Analytics,
}

/// Mirrors public homes and warps onto a web map.
pub trait MapHook: Send + Sync {
    fn update_home(&self, home: &Home);
    fn remove_home(&self, home: &Home);
    fn clear_homes(&self);
    fn update_warp(&self, warp: &Warp);
    fn remove_warp(&self, warp: &Warp);
    fn clear_warps(&self);
}

/// Receives teleport counters.
pub trait AnalyticsHook: Send + Sync {
    fn record_teleport(&self, user: &User, kind: TeleportKind, success: bool);
}

#[derive(Clone)]
pub enum Hook {
    Map(Arc<dyn MapHook>),
    Analytics(Arc<dyn AnalyticsHook>),
}

impl Hook {
    pub fn kind(&self) -> HookKind {
        match self {
            Hook::Map(_) => HookKind::Map,
            Hook::Analytics(_) => HookKind::Analytics,
        }
    }
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: DashMap<HookKind, Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under its kind, returning the hook it replaced.
    pub fn register(&self, hook: Hook) -> Option<Hook> {
        let kind = hook.kind();
        tracing::info!(?kind, "Hook registered");
        self.hooks.insert(kind, hook)
    }

    pub fn unregister(&self, kind: HookKind) -> Option<Hook> {
        self.hooks.remove(&kind).map(|(_, hook)| hook)
    }

    pub fn get(&self, kind: HookKind) -> Option<Hook> {
        self.hooks.get(&kind).map(|hook| hook.clone())
    }

    pub fn map(&self) -> Option<Arc<dyn MapHook>> {
        match self.get(HookKind::Map)? {
            Hook::Map(hook) => Some(hook),
            _ => None,
        }
    }

    pub fn analytics(&self) -> Option<Arc<dyn AnalyticsHook>> {
        match self.get(HookKind::Analytics)? {
            Hook::Analytics(hook) => Some(hook),
            _ => None,
        }
    }

    pub fn clear(&self) {
        self.hooks.clear();
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter(AtomicU32);

    impl AnalyticsHook for Counter {
        fn record_teleport(&self, _user: &User, _kind: TeleportKind, _success: bool) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_lookup_by_kind() {
        let registry = HookRegistry::new();
        assert!(registry.map().is_none());
        assert!(registry.analytics().is_none());

        let counter = Arc::new(Counter::default());
        assert!(registry.register(Hook::Analytics(counter.clone())).is_none());
        assert!(registry.map().is_none());

        let hook = registry.analytics().unwrap();
        hook.record_teleport(&User::new(uuid::Uuid::new_v4(), "alice"), TeleportKind::Normal, true);
        assert_eq!(counter.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_register_replaces_same_kind() {
        let registry = HookRegistry::new();
        registry.register(Hook::Analytics(Arc::new(Counter::default())));
        let replaced = registry.register(Hook::Analytics(Arc::new(Counter::default())));
        assert!(matches!(replaced, Some(Hook::Analytics(_))));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
