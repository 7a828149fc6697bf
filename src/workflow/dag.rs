use std::collections::{HashMap, HashSet, VecDeque};

use super::WorkflowError;

/// Validates a dependency graph before anything executes: names must be
/// unique, every dependency must name an existing node, and the graph must
/// be acyclic (Kahn's algorithm). Shared by the step engine and the
/// orchestrator.
pub fn validate_dag(nodes: &[(String, Vec<String>)]) -> Result<(), WorkflowError> {
    let mut seen = HashSet::new();
    for (name, _) in nodes {
        if !seen.insert(name.as_str()) {
            return Err(WorkflowError::ConfigError(format!(
                "duplicate node name '{name}'"
            )));
        }
    }

    for (name, deps) in nodes {
        for dep in deps {
            if !seen.contains(dep.as_str()) {
                return Err(WorkflowError::ConfigError(format!(
                    "node '{name}' depends on unknown node '{dep}'"
                )));
            }
            if dep == name {
                return Err(WorkflowError::ConfigError(format!(
                    "node '{name}' depends on itself"
                )));
            }
        }
    }

    // Kahn: repeatedly peel nodes without unresolved dependencies.
    let mut in_degree: HashMap<&str, usize> = nodes
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, deps) in nodes {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut resolved = 0;

    while let Some(name) = queue.pop_front() {
        resolved += 1;
        for dependent in dependents.get(name).into_iter().flatten().copied() {
            let degree = in_degree.get_mut(dependent).expect("known node");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if resolved != nodes.len() {
        return Err(WorkflowError::ConfigError(
            "dependency cycle detected".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(edges: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        edges
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_valid_diamond() {
        let dag = nodes(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);
        assert!(validate_dag(&dag).is_ok());
    }

    #[test]
    fn test_cycle_detected() {
        let dag = nodes(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        assert!(matches!(
            validate_dag(&dag),
            Err(WorkflowError::ConfigError(_))
        ));
    }

    #[test]
    fn test_self_dependency() {
        let dag = nodes(&[("a", &["a"])]);
        assert!(validate_dag(&dag).is_err());
    }

    #[test]
    fn test_dangling_dependency() {
        let dag = nodes(&[("a", &["ghost"])]);
        assert!(matches!(
            validate_dag(&dag),
            Err(WorkflowError::ConfigError(message)) if message.contains("ghost")
        ));
    }

    #[test]
    fn test_duplicate_name() {
        let dag = nodes(&[("a", &[]), ("a", &[])]);
        assert!(validate_dag(&dag).is_err());
    }
}
