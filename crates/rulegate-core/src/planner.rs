//! Load-time dependency checks and execution planning.

use crate::error::ConfigError;
use crate::instance::LoadedRule;
use crate::rule::RuleKey;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Verifies that every dependency target is loaded and the graph is acyclic.
///
/// # Errors
///
/// Returns [`ConfigError::DependencyNotLoaded`] for the first missing target
/// in load order, or [`ConfigError::DependencyCycle`] naming the rule ids
/// along the first cycle found.
pub fn check_dependencies<T>(rules: &[LoadedRule<T>]) -> Result<(), ConfigError> {
    let by_key: HashMap<RuleKey, &LoadedRule<T>> =
        rules.iter().map(|rule| (rule.key(), rule)).collect();

    for rule in rules {
        for dependency in rule.dependencies() {
            if !by_key.contains_key(&dependency.rule()) {
                return Err(ConfigError::DependencyNotLoaded {
                    rule: rule.id().to_string(),
                    dependency: dependency.rule().type_name(),
                });
            }
        }
    }

    let mut done = HashSet::new();
    for rule in rules {
        let mut path = Vec::new();
        find_cycle(rule, &by_key, &mut path, &mut done)?;
    }
    Ok(())
}

fn find_cycle<'a, T>(
    rule: &'a LoadedRule<T>,
    by_key: &HashMap<RuleKey, &'a LoadedRule<T>>,
    path: &mut Vec<&'a LoadedRule<T>>,
    done: &mut HashSet<RuleKey>,
) -> Result<(), ConfigError> {
    if done.contains(&rule.key()) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|r| r.key() == rule.key()) {
        let mut cycle: Vec<String> = path[start..].iter().map(|r| r.id().to_string()).collect();
        cycle.push(rule.id().to_string());
        return Err(ConfigError::DependencyCycle(cycle));
    }

    path.push(rule);
    for dependency in rule.dependencies() {
        if let Some(&prerequisite) = by_key.get(&dependency.rule()) {
            find_cycle(prerequisite, by_key, path, done)?;
        }
    }
    path.pop();
    done.insert(rule.key());
    Ok(())
}

/// Loaded rules partitioned into the three execution buckets, each in
/// configured order.
pub struct ExecutionPlan<T> {
    /// Dependency targets that have no dependencies themselves. Run first,
    /// concurrently.
    pub independent_leaves: Vec<Arc<LoadedRule<T>>>,
    /// Dependency targets that have dependencies. Run sequentially.
    pub chained: Vec<Arc<LoadedRule<T>>>,
    /// Rules no other rule depends on. Run last, concurrently.
    pub independent: Vec<Arc<LoadedRule<T>>>,
}

impl<T> ExecutionPlan<T> {
    /// Partitions rules by their role in the dependency graph.
    #[must_use]
    pub fn from_rules(rules: &[Arc<LoadedRule<T>>]) -> Self {
        let targets: HashSet<RuleKey> = rules
            .iter()
            .flat_map(|rule| rule.dependencies().iter().map(|d| d.rule()))
            .collect();

        let mut plan = Self {
            independent_leaves: Vec::new(),
            chained: Vec::new(),
            independent: Vec::new(),
        };
        for rule in rules {
            let bucket = match (targets.contains(&rule.key()), rule.dependencies().is_empty()) {
                (true, true) => &mut plan.independent_leaves,
                (true, false) => &mut plan.chained,
                (false, _) => &mut plan.independent,
            };
            bucket.push(Arc::clone(rule));
        }
        plan
    }

    /// Total number of planned rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.independent_leaves.len() + self.chained.len() + self.independent.len()
    }

    /// Returns true if nothing is planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
