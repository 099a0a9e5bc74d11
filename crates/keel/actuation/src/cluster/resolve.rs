//! Desired state of a cluster

use crate::error::{ActuationError, Result};
use keel_types::constraint::parse_hours;
use keel_types::{ClusterSpec, LaunchConfig, Location, ResourceId, ServerGroup};
use std::collections::BTreeMap;

/// One server group per region: defaults merged with that region's overrides
pub fn desired_server_groups(
    resource_id: &ResourceId,
    spec: &ClusterSpec,
    artifact_version: Option<&str>,
) -> Result<BTreeMap<String, ServerGroup>> {
    validate(resource_id, spec)?;

    spec.locations
        .regions
        .iter()
        .map(|region| {
            let merged = spec.region_spec(region);
            let instance_type = merged
                .instance_type
                .ok_or_else(|| invalid(resource_id, format!("no instance type for {}", region)))?;
            let capacity = merged.capacity.unwrap_or_default();
            if capacity.min > capacity.desired || capacity.desired > capacity.max {
                return Err(invalid(
                    resource_id,
                    format!(
                        "capacity in {} must satisfy min <= desired <= max, got {}/{}/{}",
                        region, capacity.min, capacity.desired, capacity.max
                    ),
                ));
            }

            let group = ServerGroup {
                moniker: spec.moniker.clone(),
                location: Location {
                    account: spec.locations.account.clone(),
                    region: region.clone(),
                },
                capacity,
                launch: LaunchConfig {
                    instance_type,
                    artifact_version: artifact_version.map(str::to_string),
                },
                dependencies: merged.dependencies.unwrap_or_default(),
                tags: merged.tags.unwrap_or_default(),
            };
            Ok((region.clone(), group))
        })
        .collect()
}

fn validate(resource_id: &ResourceId, spec: &ClusterSpec) -> Result<()> {
    if spec.locations.regions.is_empty() {
        return Err(invalid(resource_id, "no regions".to_string()));
    }

    if let Some(region) = spec
        .overrides
        .keys()
        .find(|region| !spec.locations.regions.contains(*region))
    {
        return Err(invalid(
            resource_id,
            format!("override for undeclared region {}", region),
        ));
    }

    for step in spec.deploy_with.stagger() {
        if !spec.locations.regions.contains(&step.region) {
            return Err(invalid(
                resource_id,
                format!("stagger step for undeclared region {}", step.region),
            ));
        }
        if let Some(hours) = &step.hours {
            parse_hours(hours).map_err(|e| invalid(resource_id, e.to_string()))?;
        }
    }

    Ok(())
}

fn invalid(resource_id: &ResourceId, reason: String) -> ActuationError {
    ActuationError::InvalidSpec {
        resource: resource_id.clone(),
        reason,
    }
}
