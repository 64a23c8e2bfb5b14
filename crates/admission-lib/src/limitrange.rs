//! Namespace resource range resolution
//!
//! Merges every range constraint of a namespace into per-container bounds.
//! Pattern-less constraints form the namespace default; pattern-scoped ones
//! further tighten the default for the containers they match.

use crate::lookup::LimitRangeLister;
use crate::models::{ConfigurationError, RangeConstraint, ResourceVector};
use crate::quantity::ResourceAmount;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Effective bounds for one container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bounds {
    pub min: ResourceVector,
    pub max: ResourceVector,
    pub default_limit: ResourceVector,
    pub default_request: ResourceVector,
    pub max_limit_request_ratio: ResourceVector,
}

impl Bounds {
    pub fn from_constraint(constraint: &RangeConstraint) -> Self {
        Self {
            min: constraint.min.clone(),
            max: constraint.max.clone(),
            default_limit: constraint.default_limit.clone(),
            default_request: constraint.default_request.clone(),
            max_limit_request_ratio: constraint.max_limit_request_ratio.clone(),
        }
    }

    /// Combine two bounds, keeping the tightest value per resource
    pub fn intersect(&mut self, other: &Bounds) {
        merge(&mut self.min, &other.min, std::cmp::max);
        merge(&mut self.max, &other.max, std::cmp::min);
        merge(&mut self.default_limit, &other.default_limit, std::cmp::min);
        merge(&mut self.default_request, &other.default_request, std::cmp::min);
        merge(
            &mut self.max_limit_request_ratio,
            &other.max_limit_request_ratio,
            std::cmp::min,
        );
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
            && self.max.is_empty()
            && self.default_limit.is_empty()
            && self.default_request.is_empty()
            && self.max_limit_request_ratio.is_empty()
    }
}

fn merge(
    into: &mut ResourceVector,
    from: &ResourceVector,
    pick: fn(ResourceAmount, ResourceAmount) -> ResourceAmount,
) {
    for (resource, value) in from {
        into.entry(resource.clone())
            .and_modify(|current| *current = pick(*current, *value))
            .or_insert(*value);
    }
}

#[derive(Debug, Clone)]
struct PatternBounds {
    pattern: Regex,
    bounds: Bounds,
}

/// Merged range constraints of one namespace
#[derive(Debug, Clone, Default)]
pub struct NamespaceRanges {
    pub namespace: String,
    pub default: Bounds,
    patterned: Vec<PatternBounds>,
    /// Constraints that could not be used
    pub config_errors: Vec<ConfigurationError>,
}

impl NamespaceRanges {
    /// Merge a namespace's constraints. Constraints with an invalid pattern
    /// are dropped, and quantities that could not be read are missing; both
    /// are reported in `config_errors`.
    pub fn merge(namespace: &str, constraints: &[RangeConstraint]) -> Self {
        let mut ranges = Self {
            namespace: namespace.to_string(),
            ..Default::default()
        };

        for constraint in constraints {
            for unreadable in &constraint.unreadable {
                warn!(
                    namespace = %namespace,
                    source = %constraint.source,
                    quantity = %unreadable,
                    "Range constraint quantity is unreadable and was left out"
                );
                ranges.config_errors.push(ConfigurationError {
                    namespace: namespace.to_string(),
                    container: None,
                    resource: None,
                    detail: format!(
                        "range constraint {} has an unreadable quantity ({})",
                        constraint.source, unreadable
                    ),
                });
            }

            let bounds = Bounds::from_constraint(constraint);
            match &constraint.container_pattern {
                None => ranges.default.intersect(&bounds),
                Some(pattern) => match Regex::new(&format!("^(?:{pattern})$")) {
                    Ok(pattern) => ranges.patterned.push(PatternBounds { pattern, bounds }),
                    Err(e) => {
                        warn!(
                            namespace = %namespace,
                            source = %constraint.source,
                            error = %e,
                            "Ignoring range constraint with invalid container pattern"
                        );
                        ranges.config_errors.push(ConfigurationError {
                            namespace: namespace.to_string(),
                            container: None,
                            resource: None,
                            detail: format!(
                                "range constraint {} has invalid container pattern '{}'",
                                constraint.source, pattern
                            ),
                        });
                    }
                },
            }
        }
        ranges
    }

    /// Bounds for a container: the namespace default intersected with every
    /// pattern-scoped constraint matching its name
    pub fn for_container(&self, container_name: &str) -> Bounds {
        let mut bounds = self.default.clone();
        for scoped in &self.patterned {
            if scoped.pattern.is_match(container_name) {
                bounds.intersect(&scoped.bounds);
            }
        }
        bounds
    }
}

/// Outcome of resolving a namespace's ranges
#[derive(Debug, Clone)]
pub enum RangeLookup {
    Known(NamespaceRanges),
    /// The backing store could not be read; capping must be skipped
    Unknown,
}

/// Resolves namespace resource ranges through a [`LimitRangeLister`]
#[derive(Clone)]
pub struct LimitRangeResolver {
    lister: Arc<dyn LimitRangeLister>,
}

impl LimitRangeResolver {
    pub fn new(lister: Arc<dyn LimitRangeLister>) -> Self {
        Self { lister }
    }

    pub async fn resolve(&self, namespace: &str) -> RangeLookup {
        match self.lister.list_constraints(namespace).await {
            Ok(constraints) => {
                debug!(
                    namespace = %namespace,
                    constraints = constraints.len(),
                    "Resolved namespace ranges"
                );
                RangeLookup::Known(NamespaceRanges::merge(namespace, &constraints))
            }
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Namespace ranges unknown");
                RangeLookup::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::InMemoryStore;
    use std::collections::BTreeMap;

    fn cores(milli: i64) -> ResourceAmount {
        ResourceAmount::from_milli(milli)
    }

    fn constraint(pattern: Option<&str>, min: Option<i64>, max: Option<i64>) -> RangeConstraint {
        RangeConstraint {
            source: "limits".to_string(),
            container_pattern: pattern.map(str::to_string),
            min: min.map(|m| BTreeMap::from([("cpu".to_string(), cores(m))])).unwrap_or_default(),
            max: max.map(|m| BTreeMap::from([("cpu".to_string(), cores(m))])).unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_intersect_tightest_wins() {
        let ranges = NamespaceRanges::merge(
            "default",
            &[
                constraint(None, Some(100), Some(4000)),
                constraint(None, Some(250), Some(2000)),
            ],
        );

        let bounds = ranges.for_container("app");
        assert_eq!(bounds.min["cpu"], cores(250));
        assert_eq!(bounds.max["cpu"], cores(2000));
    }

    #[test]
    fn test_pattern_tightens_default_for_matching_containers() {
        let ranges = NamespaceRanges::merge(
            "default",
            &[
                constraint(None, None, Some(2000)),
                constraint(Some("istio-.*"), None, Some(500)),
                // looser than the default, must not widen it
                constraint(Some("app"), None, Some(8000)),
            ],
        );

        assert_eq!(ranges.for_container("istio-proxy").max["cpu"], cores(500));
        assert_eq!(ranges.for_container("app").max["cpu"], cores(2000));
        // patterns are anchored
        assert_eq!(ranges.for_container("my-istio-proxy").max["cpu"], cores(2000));
        assert_eq!(ranges.for_container("app-2").max["cpu"], cores(2000));
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let ranges = NamespaceRanges::merge(
            "default",
            &[
                constraint(None, None, Some(2000)),
                constraint(Some("(unclosed"), None, Some(100)),
            ],
        );

        assert_eq!(ranges.config_errors.len(), 1);
        assert_eq!(ranges.for_container("app").max["cpu"], cores(2000));
    }

    #[test]
    fn test_unreadable_quantity_is_configuration_error() {
        let mut partial = constraint(None, None, Some(2000));
        partial.unreadable = vec!["max ephemeral-storage: quantity '10Pi' is out of range".to_string()];
        let ranges = NamespaceRanges::merge("default", &[partial]);

        assert_eq!(ranges.config_errors.len(), 1);
        assert!(ranges.config_errors[0].detail.contains("10Pi"));
        // the readable bound still applies
        assert_eq!(ranges.for_container("app").max["cpu"], cores(2000));
    }

    #[test]
    fn test_intersect_keeps_smallest_ratio_and_default_limit() {
        let mut a = Bounds {
            default_limit: BTreeMap::from([("cpu".to_string(), cores(1000))]),
            max_limit_request_ratio: BTreeMap::from([("cpu".to_string(), cores(4000))]),
            ..Default::default()
        };
        let b = Bounds {
            default_limit: BTreeMap::from([("cpu".to_string(), cores(500))]),
            max_limit_request_ratio: BTreeMap::from([("cpu".to_string(), cores(2000))]),
            ..Default::default()
        };
        a.intersect(&b);

        assert_eq!(a.default_limit["cpu"], cores(500));
        assert_eq!(a.max_limit_request_ratio["cpu"], cores(2000));
    }

    #[tokio::test]
    async fn test_empty_namespace_is_known_and_unbounded() {
        let resolver = LimitRangeResolver::new(Arc::new(InMemoryStore::new()));

        match resolver.resolve("default").await {
            RangeLookup::Known(ranges) => assert!(ranges.for_container("app").is_empty()),
            RangeLookup::Unknown => panic!("expected known ranges"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unknown() {
        let store = Arc::new(InMemoryStore::new());
        store.add_constraint("default", constraint(None, None, Some(2000))).await;
        store.set_constraints_unreachable(true);
        let resolver = LimitRangeResolver::new(store);

        assert!(matches!(resolver.resolve("default").await, RangeLookup::Unknown));
    }
}
