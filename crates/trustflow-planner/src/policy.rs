//! Backend selection policies.

use trustflow_core::config::BackendKind;

use crate::registry::{BackendRegistry, Requirement};

/// Picks one backend among those the registry says can host `req`.
pub trait BackendPolicy: Send + Sync {
    fn select(&self, registry: &BackendRegistry, req: &Requirement) -> Option<BackendKind>;

    fn name(&self) -> &'static str;
}

/// Lowest cost wins; registry order breaks ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheapestCapable;

impl BackendPolicy for CheapestCapable {
    fn select(&self, registry: &BackendRegistry, req: &Requirement) -> Option<BackendKind> {
        // min_by_key keeps the first of equal minima
        registry.capable(req).min_by_key(|d| d.cost).map(|d| d.kind)
    }

    fn name(&self) -> &'static str {
        "cheapest-capable"
    }
}

/// First capable backend in a fixed preference list; unlisted kinds are never chosen.
#[derive(Debug, Clone, Default)]
pub struct PreferenceOrder(pub Vec<BackendKind>);

impl BackendPolicy for PreferenceOrder {
    fn select(&self, registry: &BackendRegistry, req: &Requirement) -> Option<BackendKind> {
        self.0
            .iter()
            .copied()
            .find(|kind| registry.get(*kind).is_some_and(|d| d.supports(req)))
    }

    fn name(&self) -> &'static str {
        "preference-order"
    }
}
