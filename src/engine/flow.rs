//! Flow registry.
//!
//! Maps flow names to ordered pipeline lists. The whole mapping is an
//! immutable snapshot swapped atomically on reload, so readers never observe
//! a mix of old and new definitions.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::FlowSpec;
use crate::domain::PipelineId;
use crate::error::{BastionError, BastionResult};

/// Name of the implicit flow containing every registered pipeline.
pub const DEFAULT_FLOW: &str = "default";

/// A named, ordered sequence of pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDefinition {
    pub name: String,
    /// Execution order; semantically significant.
    pub pipelines: Vec<PipelineId>,
}

pub struct FlowRegistry {
    flows: ArcSwap<HashMap<String, FlowDefinition>>,
}

impl FlowRegistry {
    /// Build the registry from configured flow specs.
    ///
    /// Pipeline names that are not valid identifiers are warned about and
    /// dropped. A `default` flow over `registered` is added unless the
    /// configuration defines its own.
    pub fn from_specs(specs: &[FlowSpec], registered: &[PipelineId]) -> Self {
        let flows = Self::build_map(specs, registered);
        Self {
            flows: ArcSwap::from_pointee(flows),
        }
    }

    fn build_map(
        specs: &[FlowSpec],
        registered: &[PipelineId],
    ) -> HashMap<String, FlowDefinition> {
        let mut flows = HashMap::new();

        for spec in specs {
            let mut pipelines = Vec::with_capacity(spec.pipelines.len());
            for name in &spec.pipelines {
                match name.parse::<PipelineId>() {
                    Ok(id) => pipelines.push(id),
                    Err(_) => {
                        tracing::warn!(flow = %spec.name, pipeline = %name, "Skipping unknown pipeline name in flow");
                    }
                }
            }
            if pipelines.is_empty() {
                tracing::warn!(flow = %spec.name, "Skipping flow with no valid pipelines");
                continue;
            }
            flows.insert(
                spec.name.clone(),
                FlowDefinition {
                    name: spec.name.clone(),
                    pipelines,
                },
            );
        }

        flows.entry(DEFAULT_FLOW.to_string()).or_insert_with(|| {
            FlowDefinition {
                name: DEFAULT_FLOW.to_string(),
                pipelines: registered.to_vec(),
            }
        });

        flows
    }

    /// Resolve a flow by name.
    pub fn resolve(&self, flow_name: &str) -> BastionResult<FlowDefinition> {
        self.flows
            .load()
            .get(flow_name)
            .cloned()
            .ok_or_else(|| BastionError::UnknownFlow(flow_name.to_string()))
    }

    /// All flows, sorted by name.
    pub fn list(&self) -> Vec<FlowDefinition> {
        let mut flows: Vec<FlowDefinition> = self.flows.load().values().cloned().collect();
        flows.sort_by(|a, b| a.name.cmp(&b.name));
        flows
    }

    /// Replace every flow definition in one atomic swap.
    pub fn reload(&self, specs: &[FlowSpec], registered: &[PipelineId]) {
        let flows = Self::build_map(specs, registered);
        let count = flows.len();
        self.flows.store(Arc::new(flows));
        tracing::info!(flows = count, "Flow definitions reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, pipelines: &[&str]) -> FlowSpec {
        FlowSpec {
            name: name.to_string(),
            pipelines: pipelines.iter().map(|p| p.to_string()).collect(),
        }
    }

    const REGISTERED: [PipelineId; 2] = [PipelineId::Rule, PipelineId::Similarity];

    #[test]
    fn test_resolve_preserves_declared_order() {
        let registry = FlowRegistry::from_specs(
            &[spec("base_audit", &["rule", "similarity"])],
            &REGISTERED,
        );
        let flow = registry.resolve("base_audit").unwrap();
        assert_eq!(
            flow.pipelines,
            vec![PipelineId::Rule, PipelineId::Similarity]
        );
    }

    #[test]
    fn test_unknown_flow_errors() {
        let registry = FlowRegistry::from_specs(&[], &REGISTERED);
        let err = registry.resolve("nonexistent").unwrap_err();
        assert!(matches!(err, BastionError::UnknownFlow(_)));
    }

    #[test]
    fn test_implicit_default_flow_covers_registered_pipelines() {
        let registry = FlowRegistry::from_specs(&[], &REGISTERED);
        let flow = registry.resolve(DEFAULT_FLOW).unwrap();
        assert_eq!(flow.pipelines, REGISTERED.to_vec());
    }

    #[test]
    fn test_explicit_default_flow_wins() {
        let registry =
            FlowRegistry::from_specs(&[spec("default", &["rule"])], &REGISTERED);
        let flow = registry.resolve(DEFAULT_FLOW).unwrap();
        assert_eq!(flow.pipelines, vec![PipelineId::Rule]);
    }

    #[test]
    fn test_invalid_pipeline_names_are_dropped() {
        let registry = FlowRegistry::from_specs(
            &[spec("audit", &["rule", "no_such_pipeline"])],
            &REGISTERED,
        );
        let flow = registry.resolve("audit").unwrap();
        assert_eq!(flow.pipelines, vec![PipelineId::Rule]);
    }

    #[test]
    fn test_reload_replaces_whole_mapping() {
        let registry =
            FlowRegistry::from_specs(&[spec("old_flow", &["rule"])], &REGISTERED);
        assert!(registry.resolve("old_flow").is_ok());

        registry.reload(&[spec("new_flow", &["similarity"])], &REGISTERED);

        assert!(matches!(
            registry.resolve("old_flow"),
            Err(BastionError::UnknownFlow(_))
        ));
        assert!(registry.resolve("new_flow").is_ok());
        assert!(registry.resolve(DEFAULT_FLOW).is_ok());
    }
}
