//! Static dependency graph between fields and UI affordances.
//!
//! An edge says "when `source` changes, re-evaluate `target`".  Three effects
//! exist:
//!
//! - [`EdgeEffect::EnableIf`]: the target is enabled iff the predicate holds.
//! - [`EdgeEffect::VisibleIf`]: the target is shown iff the predicate holds.
//! - [`EdgeEffect::Recompute`]: the target field's value is derived from the
//!   source's value and written back through the store.
//!
//! Edges are declared once and never mutated.  Enable/visible edges are pure
//! functions of the new value, so they cannot loop.  Recompute edges write to
//! the store, so the graph rejects any recompute cycle at construction time.
//!
//! Removals that depend only on the platform (not on a field value) are
//! [`StaticRule`]s, applied once when the screen opens.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::field::{FieldKey, FieldValue};

/// Errors raised while building a graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Following recompute edges from this field leads back to it.
    #[error("recompute edges form a cycle through `{0}`")]
    RecomputeCycle(FieldKey),

    /// A recompute edge must write to a field, not to an affordance.
    #[error("recompute edge from `{from}` targets a UI affordance")]
    RecomputeIntoAffordance { from: FieldKey },
}

/// UI elements that are not fields but still follow field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    /// Navigation entry for the Clash API dashboard.
    ClashDashboardEntry,
}

/// Anything the graph can enable, hide or recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    Field(FieldKey),
    Affordance(Affordance),
}

/// Condition evaluated against the source field's new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    IsTrue,
    /// Text of a string/enum value differs from the given literal.
    TextIsNot(&'static str),
    NonEmptySet,
}

impl Predicate {
    /// Evaluates the predicate.  A value of the wrong type never satisfies it.
    pub fn holds(&self, value: &FieldValue) -> bool {
        match self {
            Predicate::IsTrue => value.as_bool() == Some(true),
            Predicate::TextIsNot(literal) => value.as_str().is_some_and(|s| s != *literal),
            Predicate::NonEmptySet => value.as_set().is_some_and(|s| !s.is_empty()),
        }
    }
}

/// How a recomputed value is derived from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeRule {
    /// The target takes the source's value unchanged.
    Mirror,
}

impl RecomputeRule {
    fn apply(&self, source: &FieldValue) -> FieldValue {
        match self {
            RecomputeRule::Mirror => source.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEffect {
    EnableIf(Predicate),
    VisibleIf(Predicate),
    Recompute(RecomputeRule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEdge {
    pub source: FieldKey,
    pub target: Target,
    pub effect: EdgeEffect,
}

impl DependencyEdge {
    pub const fn new(source: FieldKey, target: Target, effect: EdgeEffect) -> Self {
        Self {
            source,
            target,
            effect,
        }
    }

    fn evaluate(&self, value: &FieldValue) -> Option<Resolution> {
        match self.effect {
            EdgeEffect::EnableIf(pred) => Some(Resolution::Enable {
                target: self.target,
                enabled: pred.holds(value),
            }),
            EdgeEffect::VisibleIf(pred) => Some(Resolution::Visible {
                target: self.target,
                visible: pred.holds(value),
            }),
            EdgeEffect::Recompute(rule) => match self.target {
                Target::Field(target) => Some(Resolution::Recompute {
                    target,
                    value: rule.apply(value),
                }),
                Target::Affordance(_) => None,
            },
        }
    }
}

/// One consequence of a field change, in edge-declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Resolution {
    Enable { target: Target, enabled: bool },
    Visible { target: Target, visible: bool },
    Recompute { target: FieldKey, value: FieldValue },
}

/// What the running platform can do.  Supplied by the host, never detected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    /// The OS can report (and the service can honour) metered networks.
    pub metered_network: bool,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self {
            metered_network: true,
        }
    }
}

/// A one-time change applied when the screen opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "target", rename_all = "snake_case")]
pub enum StaticRule {
    /// The element is taken off the screen entirely.
    Remove(Target),
    /// The element stays declared but is not shown.
    Hide(Target),
}

/// Immutable set of dependency edges.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    /// Builds a graph from edges, in the order they should be reported.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::RecomputeCycle`] if recompute edges are cyclic and
    /// [`GraphError::RecomputeIntoAffordance`] for a recompute edge whose
    /// target is not a field.
    pub fn new(edges: Vec<DependencyEdge>) -> Result<Self, GraphError> {
        let mut recompute: BTreeMap<FieldKey, Vec<FieldKey>> = BTreeMap::new();
        for edge in &edges {
            if let EdgeEffect::Recompute(_) = edge.effect {
                match edge.target {
                    Target::Field(target) => recompute.entry(edge.source).or_default().push(target),
                    Target::Affordance(_) => {
                        return Err(GraphError::RecomputeIntoAffordance { from: edge.source })
                    }
                }
            }
        }
        check_acyclic(&recompute)?;
        Ok(Self { edges })
    }

    /// The edges the settings screen ships with.
    pub fn standard() -> Self {
        use EdgeEffect::*;
        let edges = vec![
            DependencyEdge::new(
                FieldKey::SpeedInterval,
                Target::Field(FieldKey::ProfileTrafficStatistics),
                EnableIf(Predicate::TextIsNot("0")),
            ),
            DependencyEdge::new(
                FieldKey::BypassLan,
                Target::Field(FieldKey::BypassLanInCore),
                EnableIf(Predicate::IsTrue),
            ),
            DependencyEdge::new(
                FieldKey::EnableClashApi,
                Target::Affordance(Affordance::ClashDashboardEntry),
                VisibleIf(Predicate::IsTrue),
            ),
            DependencyEdge::new(
                FieldKey::NekoPlugins,
                Target::Field(FieldKey::RoutePackages),
                Recompute(RecomputeRule::Mirror),
            ),
        ];
        // The standard edge list has a single recompute edge, so it cannot cycle.
        Self { edges }
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Resolves the consequences of `source` now holding `new_value`.
    ///
    /// Every matching edge is evaluated against `new_value` itself; nothing is
    /// cached between calls.
    pub fn resolve(&self, source: FieldKey, new_value: &FieldValue) -> Vec<Resolution> {
        self.edges
            .iter()
            .filter(|edge| edge.source == source)
            .filter_map(|edge| edge.evaluate(new_value))
            .collect()
    }

    /// Evaluates every edge once, for the screen's initial state.
    ///
    /// `value_of` returns the current value of a field, or `None` for fields
    /// the caller does not hold; their edges are skipped.
    pub fn initial_state<F>(&self, mut value_of: F) -> Vec<Resolution>
    where
        F: FnMut(FieldKey) -> Option<FieldValue>,
    {
        self.edges
            .iter()
            .filter_map(|edge| {
                let value = value_of(edge.source)?;
                edge.evaluate(&value)
            })
            .collect()
    }

    /// One-time removals and hidings for this platform.
    pub fn static_rules(&self, caps: &PlatformCapabilities) -> Vec<StaticRule> {
        let mut rules = Vec::new();
        if !caps.metered_network {
            rules.push(StaticRule::Remove(Target::Field(FieldKey::MeteredNetwork)));
        }
        rules.push(StaticRule::Hide(Target::Field(FieldKey::TcpKeepAliveInterval)));
        rules
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::standard()
    }
}

/// Kahn's algorithm over the recompute adjacency list.
fn check_acyclic(adjacency: &BTreeMap<FieldKey, Vec<FieldKey>>) -> Result<(), GraphError> {
    let mut nodes: BTreeSet<FieldKey> = BTreeSet::new();
    let mut in_degree: BTreeMap<FieldKey, usize> = BTreeMap::new();
    for (source, targets) in adjacency {
        nodes.insert(*source);
        for target in targets {
            nodes.insert(*target);
            *in_degree.entry(*target).or_default() += 1;
        }
    }

    let mut queue: VecDeque<FieldKey> = nodes
        .iter()
        .copied()
        .filter(|n| in_degree.get(n).copied().unwrap_or(0) == 0)
        .collect();
    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        for target in adjacency.get(&node).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(target) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(*target);
                }
            }
        }
    }

    if visited == nodes.len() {
        return Ok(());
    }
    // Any node still carrying in-degree sits on (or behind) a cycle.
    let stuck = in_degree
        .iter()
        .find(|(_, d)| **d > 0)
        .map(|(k, _)| *k)
        .unwrap_or(FieldKey::ALL[0]);
    Err(GraphError::RecomputeCycle(stuck))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::FieldType;

    fn interval(v: &str) -> FieldValue {
        FieldValue::Enum(v.to_string())
    }

    #[test]
    fn test_zero_speed_interval_disables_traffic_statistics() {
        let graph = DependencyGraph::standard();

        let out = graph.resolve(FieldKey::SpeedInterval, &interval("0"));

        assert_eq!(
            out,
            vec![Resolution::Enable {
                target: Target::Field(FieldKey::ProfileTrafficStatistics),
                enabled: false,
            }]
        );
    }

    #[test]
    fn test_non_zero_speed_interval_enables_traffic_statistics() {
        let graph = DependencyGraph::standard();
        for v in ["500", "1000", "3000", "10000"] {
            let out = graph.resolve(FieldKey::SpeedInterval, &interval(v));
            assert_eq!(
                out,
                vec![Resolution::Enable {
                    target: Target::Field(FieldKey::ProfileTrafficStatistics),
                    enabled: true,
                }],
                "interval {v}"
            );
        }
    }

    #[test]
    fn test_resolve_uses_only_the_value_passed_in() {
        // Alternate values; each answer must follow the latest input, never the previous one.
        let graph = DependencyGraph::standard();
        let expected = [("0", false), ("1000", true), ("0", false), ("500", true)];
        for (v, enabled) in expected {
            let out = graph.resolve(FieldKey::SpeedInterval, &interval(v));
            assert!(matches!(out[0], Resolution::Enable { enabled: e, .. } if e == enabled));
        }
    }

    #[test]
    fn test_unrelated_field_resolves_to_nothing() {
        let graph = DependencyGraph::standard();
        assert!(graph.resolve(FieldKey::MixedPort, &FieldValue::Int(1080)).is_empty());
    }

    #[test]
    fn test_plugins_recompute_route_packages() {
        let graph = DependencyGraph::standard();
        let plugins = FieldType::StringSet.parse("moe.matsuri.exe.hysteria").unwrap();

        let out = graph.resolve(FieldKey::NekoPlugins, &plugins);

        assert_eq!(
            out,
            vec![Resolution::Recompute {
                target: FieldKey::RoutePackages,
                value: plugins,
            }]
        );
    }

    #[test]
    fn test_clash_api_toggles_dashboard_visibility() {
        let graph = DependencyGraph::standard();
        let out = graph.resolve(FieldKey::EnableClashApi, &FieldValue::Bool(true));
        assert_eq!(
            out,
            vec![Resolution::Visible {
                target: Target::Affordance(Affordance::ClashDashboardEntry),
                visible: true,
            }]
        );
    }

    #[test]
    fn test_resolution_follows_declaration_order() {
        let graph = DependencyGraph::new(vec![
            DependencyEdge::new(
                FieldKey::BypassLan,
                Target::Field(FieldKey::BypassLanInCore),
                EdgeEffect::EnableIf(Predicate::IsTrue),
            ),
            DependencyEdge::new(
                FieldKey::BypassLan,
                Target::Affordance(Affordance::ClashDashboardEntry),
                EdgeEffect::VisibleIf(Predicate::IsTrue),
            ),
        ])
        .unwrap();

        let out = graph.resolve(FieldKey::BypassLan, &FieldValue::Bool(false));

        assert!(matches!(out[0], Resolution::Enable { enabled: false, .. }));
        assert!(matches!(out[1], Resolution::Visible { visible: false, .. }));
    }

    #[test]
    fn test_recompute_cycle_is_rejected() {
        let result = DependencyGraph::new(vec![
            DependencyEdge::new(
                FieldKey::NekoPlugins,
                Target::Field(FieldKey::RoutePackages),
                EdgeEffect::Recompute(RecomputeRule::Mirror),
            ),
            DependencyEdge::new(
                FieldKey::RoutePackages,
                Target::Field(FieldKey::NekoPlugins),
                EdgeEffect::Recompute(RecomputeRule::Mirror),
            ),
        ]);
        assert!(matches!(result, Err(GraphError::RecomputeCycle(_))));
    }

    #[test]
    fn test_enable_edges_may_point_back_without_cycle_error() {
        let result = DependencyGraph::new(vec![
            DependencyEdge::new(
                FieldKey::BypassLan,
                Target::Field(FieldKey::BypassLanInCore),
                EdgeEffect::EnableIf(Predicate::IsTrue),
            ),
            DependencyEdge::new(
                FieldKey::BypassLanInCore,
                Target::Field(FieldKey::BypassLan),
                EdgeEffect::EnableIf(Predicate::IsTrue),
            ),
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_recompute_into_affordance_is_rejected() {
        let result = DependencyGraph::new(vec![DependencyEdge::new(
            FieldKey::NekoPlugins,
            Target::Affordance(Affordance::ClashDashboardEntry),
            EdgeEffect::Recompute(RecomputeRule::Mirror),
        )]);
        assert_eq!(
            result.unwrap_err(),
            GraphError::RecomputeIntoAffordance {
                from: FieldKey::NekoPlugins
            }
        );
    }

    #[test]
    fn test_standard_edges_pass_construction_checks() {
        let standard = DependencyGraph::standard();
        assert!(DependencyGraph::new(standard.edges().to_vec()).is_ok());
    }

    #[test]
    fn test_metered_network_removed_only_without_capability() {
        let graph = DependencyGraph::standard();
        let metered = StaticRule::Remove(Target::Field(FieldKey::MeteredNetwork));

        let without = graph.static_rules(&PlatformCapabilities {
            metered_network: false,
        });
        let with = graph.static_rules(&PlatformCapabilities {
            metered_network: true,
        });

        assert!(without.contains(&metered));
        assert!(!with.contains(&metered));
    }

    #[test]
    fn test_keep_alive_interval_is_always_hidden() {
        let graph = DependencyGraph::standard();
        let rules = graph.static_rules(&PlatformCapabilities::default());
        assert!(rules.contains(&StaticRule::Hide(Target::Field(
            FieldKey::TcpKeepAliveInterval
        ))));
    }

    #[test]
    fn test_initial_state_skips_fields_the_caller_does_not_hold() {
        let graph = DependencyGraph::standard();
        let out = graph.initial_state(|key| match key {
            FieldKey::SpeedInterval => Some(interval("0")),
            _ => None,
        });
        assert_eq!(out.len(), 1);
    }

}
