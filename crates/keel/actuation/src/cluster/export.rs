//! Reverse-engineer a cluster spec from what is deployed
//!
//! Per field, the value shared by most regions becomes the default (ties go
//! to the first region in order); regions only keep the fields they differ
//! in.

use keel_types::{
    ActiveServerGroup, ClusterDeployStrategy, ClusterLocations, ClusterSpec, Dependencies,
    Moniker, ServerGroupSpec,
};
use std::collections::BTreeMap;

/// `None` when nothing is deployed
pub fn export_spec(
    account: &str,
    moniker: &Moniker,
    current: &BTreeMap<String, ActiveServerGroup>,
) -> Option<ClusterSpec> {
    if current.is_empty() {
        return None;
    }

    let groups: Vec<_> = current.values().map(|a| &a.server_group).collect();
    let defaults = ServerGroupSpec {
        capacity: most_common(groups.iter().map(|g| g.capacity)),
        instance_type: most_common(groups.iter().map(|g| g.launch.instance_type.clone())),
        dependencies: most_common(groups.iter().map(|g| g.dependencies.clone()))
            .filter(|d| *d != Dependencies::default()),
        tags: most_common(groups.iter().map(|g| g.tags.clone())).filter(|t| !t.is_empty()),
    };

    let default_dependencies = defaults.dependencies.clone().unwrap_or_default();
    let default_tags = defaults.tags.clone().unwrap_or_default();

    let overrides = current
        .iter()
        .filter_map(|(region, active)| {
            let group = &active.server_group;
            let spec = ServerGroupSpec {
                capacity: Some(group.capacity).filter(|c| Some(*c) != defaults.capacity),
                instance_type: Some(group.launch.instance_type.clone())
                    .filter(|t| Some(t) != defaults.instance_type.as_ref()),
                dependencies: Some(group.dependencies.clone())
                    .filter(|d| *d != default_dependencies),
                tags: Some(group.tags.clone()).filter(|t| *t != default_tags),
            };
            (!spec.is_empty()).then(|| (region.clone(), spec))
        })
        .collect();

    Some(ClusterSpec {
        moniker: moniker.clone(),
        locations: ClusterLocations {
            account: account.to_string(),
            regions: current.keys().cloned().collect(),
        },
        artifact_reference: None,
        deploy_with: ClusterDeployStrategy::default(),
        defaults,
        overrides,
    })
}

fn most_common<T: PartialEq>(values: impl Iterator<Item = T>) -> Option<T> {
    let values: Vec<T> = values.collect();
    let mut best: Option<(usize, usize)> = None;

    for (idx, value) in values.iter().enumerate() {
        let count = values.iter().filter(|v| *v == value).count();
        if best.map_or(true, |(_, most)| count > most) {
            best = Some((idx, count));
        }
    }

    let (idx, _) = best?;
    values.into_iter().nth(idx)
}
