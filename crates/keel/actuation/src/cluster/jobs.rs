//! Orchestrator stages for cluster convergence

use crate::launcher::Stage;
use keel_types::constraint::parse_hours;
use keel_types::{
    ActiveServerGroup, ClusterDeployStrategy, ResourceId, ServerGroup, StaggeredRegion, TaskId,
    ValidationError,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;

pub const CLOUD_PROVIDER: &str = "aws";

/// Deploy a new server group with the full desired state
///
/// `source` names the server group being replaced, if there is one.
pub fn create_server_group(
    resource_id: &ResourceId,
    desired: &ServerGroup,
    current: Option<&ActiveServerGroup>,
    strategy: &ClusterDeployStrategy,
) -> Stage {
    let mut stage = object(json!({
        "type": "createServerGroup",
        "cloudProvider": CLOUD_PROVIDER,
        "application": desired.moniker.app,
        "moniker": desired.moniker,
        "credentials": desired.location.account,
        "region": desired.location.region,
        "capacity": desired.capacity,
        "instanceType": desired.launch.instance_type,
        "artifactVersion": desired.launch.artifact_version,
        "loadBalancers": desired.dependencies.load_balancers,
        "securityGroups": desired.dependencies.security_groups,
        "targetGroups": desired.dependencies.target_groups,
        "tags": desired.tags,
        "metadata": { "resource": resource_id },
    }));
    stage.extend(strategy.to_job_properties());

    if let Some(current) = current {
        stage.insert(
            "source".to_string(),
            json!({
                "account": current.server_group.location.account,
                "region": current.server_group.location.region,
                "asgName": current.name,
            }),
        );
    }
    stage
}

/// Resize the running server group in place
pub fn resize_server_group(desired: &ServerGroup, current: &ActiveServerGroup) -> Stage {
    object(json!({
        "type": "resizeServerGroup",
        "cloudProvider": CLOUD_PROVIDER,
        "credentials": desired.location.account,
        "region": desired.location.region,
        "moniker": desired.moniker,
        "serverGroupName": current.name,
        "asgName": current.name,
        "action": "scale_exact",
        "capacity": desired.capacity,
    }))
}

pub fn destroy_server_group(current: &ActiveServerGroup) -> Stage {
    let location = &current.server_group.location;
    object(json!({
        "type": "destroyServerGroup",
        "cloudProvider": CLOUD_PROVIDER,
        "credentials": location.account,
        "region": location.region,
        "moniker": current.server_group.moniker,
        "serverGroupName": current.name,
        "asgName": current.name,
    }))
}

/// Block until another execution has finished
pub fn depends_on_execution(task: &TaskId) -> Stage {
    object(json!({
        "type": "dependsOnExecution",
        "executionType": "orchestration",
        "executionId": task.as_str(),
    }))
}

pub fn wait(pause: Duration) -> Stage {
    object(json!({
        "type": "wait",
        "waitTime": pause.as_secs(),
    }))
}

/// Only let `stage` start within the given hours (UTC)
pub fn restrict_to_hours(stage: &mut Stage, hours: &str) -> Result<(), ValidationError> {
    let whitelist = hour_windows(&parse_hours(hours)?);
    stage.insert("restrictExecutionDuringTimeWindow".to_string(), Value::Bool(true));
    stage.insert(
        "restrictedExecutionWindow".to_string(),
        json!({ "whitelist": whitelist }),
    );
    Ok(())
}

/// Stages of one step of a staggered deploy: wait for the previous step,
/// converge within the allowed hours, then pause
pub fn staggered(
    stage: Stage,
    previous: Option<&TaskId>,
    step: &StaggeredRegion,
) -> Result<Vec<Stage>, ValidationError> {
    let mut main = stage;
    if let Some(hours) = &step.hours {
        restrict_to_hours(&mut main, hours)?;
    }

    let mut stages: Vec<Stage> = previous.map(depends_on_execution).into_iter().collect();
    stages.push(main);
    if let Some(pause) = step.pause_time {
        stages.push(wait(pause));
    }
    Ok(chain(stages))
}

/// Stages of a region deployed after the staggered ones
pub fn after(previous: Option<&TaskId>, stage: Stage) -> Vec<Stage> {
    let mut stages: Vec<Stage> = previous.map(depends_on_execution).into_iter().collect();
    stages.push(stage);
    chain(stages)
}

/// Number stages so each one requires the one before it
pub fn chain(stages: Vec<Stage>) -> Vec<Stage> {
    stages
        .into_iter()
        .enumerate()
        .map(|(idx, mut stage)| {
            let requisites: Vec<String> = if idx == 0 {
                Vec::new()
            } else {
                vec![idx.to_string()]
            };
            stage.insert("refId".to_string(), Value::from((idx + 1).to_string()));
            stage.insert("requisiteStageRefIds".to_string(), json!(requisites));
            stage
        })
        .collect()
}

/// Number stages so they all run at once
pub fn parallel(stages: Vec<Stage>) -> Vec<Stage> {
    stages
        .into_iter()
        .enumerate()
        .map(|(idx, mut stage)| {
            stage.insert("refId".to_string(), Value::from((idx + 1).to_string()));
            stage.insert("requisiteStageRefIds".to_string(), json!([]));
            stage
        })
        .collect()
}

/// Runs of consecutive hours as `[start, end)` windows
fn hour_windows(hours: &BTreeSet<u32>) -> Vec<Value> {
    let mut windows = Vec::new();
    let mut run: Option<(u32, u32)> = None;

    for &hour in hours {
        run = match run {
            Some((start, end)) if hour == end + 1 => Some((start, hour)),
            Some((start, end)) => {
                windows.push(window(start, end));
                Some((hour, hour))
            }
            None => Some((hour, hour)),
        };
    }
    if let Some((start, end)) = run {
        windows.push(window(start, end));
    }
    windows
}

fn window(start: u32, last: u32) -> Value {
    json!({
        "startHour": start,
        "startMin": 0,
        "endHour": (last + 1) % 24,
        "endMin": 0,
    })
}

fn object(value: Value) -> Stage {
    match value {
        Value::Object(map) => map,
        _ => Stage::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Capacity, Dependencies, LaunchConfig, Location, Moniker};
    use std::collections::BTreeMap;

    fn group(region: &str) -> ServerGroup {
        ServerGroup {
            moniker: Moniker::new("fnord").with_stack("main"),
            location: Location {
                account: "prod".to_string(),
                region: region.to_string(),
            },
            capacity: Capacity::new(1, 5, 2),
            launch: LaunchConfig {
                instance_type: "m5.large".to_string(),
                artifact_version: Some("fnord-1.0.0".to_string()),
            },
            dependencies: Dependencies::default(),
            tags: BTreeMap::new(),
        }
    }

    fn active(region: &str) -> ActiveServerGroup {
        ActiveServerGroup {
            name: "fnord-main-v003".to_string(),
            server_group: group(region),
        }
    }

    #[test]
    fn test_create_carries_strategy_and_source() {
        let id = ResourceId::new("ec2:cluster:prod:fnord-main");
        let strategy = ClusterDeployStrategy::default();

        let first = create_server_group(&id, &group("us-east-1"), None, &strategy);
        assert_eq!(first["type"], "createServerGroup");
        assert_eq!(first["strategy"], "redblack");
        assert_eq!(first["metadata"]["resource"], "ec2:cluster:prod:fnord-main");
        assert!(!first.contains_key("source"));

        let replacing =
            create_server_group(&id, &group("us-east-1"), Some(&active("us-east-1")), &strategy);
        assert_eq!(replacing["source"]["asgName"], "fnord-main-v003");
        assert_eq!(replacing["source"]["region"], "us-east-1");
        assert_eq!(replacing["source"]["account"], "prod");
    }

    #[test]
    fn test_resize_targets_current_group() {
        let stage = resize_server_group(&group("us-east-1"), &active("us-east-1"));
        assert_eq!(stage["type"], "resizeServerGroup");
        assert_eq!(stage["serverGroupName"], "fnord-main-v003");
        assert_eq!(stage["capacity"]["desired"], 2);
    }

    #[test]
    fn test_staggered_step_stages() {
        let step = StaggeredRegion {
            region: "us-east-1".to_string(),
            hours: Some("9-11,14".to_string()),
            pause_time: Some(Duration::from_secs(300)),
        };
        let previous = TaskId::new("01");
        let stages = staggered(
            create_server_group(
                &ResourceId::new("r"),
                &group("us-east-1"),
                None,
                &ClusterDeployStrategy::default(),
            ),
            Some(&previous),
            &step,
        )
        .unwrap();

        let types: Vec<&Value> = stages.iter().map(|s| &s["type"]).collect();
        assert_eq!(types, vec!["dependsOnExecution", "createServerGroup", "wait"]);
        assert_eq!(stages[0]["executionId"], "01");
        assert_eq!(stages[1]["requisiteStageRefIds"], json!(["1"]));
        assert_eq!(stages[2]["waitTime"], 300);

        let whitelist = &stages[1]["restrictedExecutionWindow"]["whitelist"];
        assert_eq!(whitelist[0]["startHour"], 9);
        assert_eq!(whitelist[0]["endHour"], 12);
        assert_eq!(whitelist[1]["startHour"], 14);
        assert_eq!(whitelist[1]["endHour"], 15);
    }

    #[test]
    fn test_parallel_stages_have_no_requisites() {
        let stages = parallel(vec![
            destroy_server_group(&active("us-east-1")),
            destroy_server_group(&active("us-west-2")),
        ]);
        assert_eq!(stages[1]["refId"], "2");
        assert_eq!(stages[1]["requisiteStageRefIds"], json!([]));
        assert_eq!(stages[1]["region"], "us-west-2");
    }
}
