//! Lifecycle event types
//!
//! Every task follows the same `<task>.triggered` → `<task>.started` →
//! `<task>.finished` sequence. Incoming event types may carry a dotted
//! namespace prefix (e.g. `sh.example.event.deployment.triggered`); outgoing
//! ones use the plain form.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::naming::is_dns_label;
use crate::error::RolloutError;

/// Tasks this service takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Deployment,
    Release,
    Rollback,
    Action,
    ServiceDelete,
}

impl Task {
    pub const ALL: [Task; 5] = [
        Task::Deployment,
        Task::Release,
        Task::Rollback,
        Task::Action,
        Task::ServiceDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Release => "release",
            Self::Rollback => "rollback",
            Self::Action => "action",
            Self::ServiceDelete => "service.delete",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Triggered,
    Started,
    Finished,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Started => "started",
            Self::Finished => "finished",
        }
    }
}

/// A parsed event type, e.g. `service.delete.finished`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType {
    pub task: Task,
    pub phase: Phase,
}

impl EventType {
    pub fn new(task: Task, phase: Phase) -> Self {
        Self { task, phase }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.task.as_str(), self.phase.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, phase) = s
            .rsplit_once('.')
            .ok_or_else(|| format!("event type '{}' has no phase", s))?;

        let phase = match phase {
            "triggered" => Phase::Triggered,
            "started" => Phase::Started,
            "finished" => Phase::Finished,
            other => return Err(format!("unknown event phase '{}'", other)),
        };

        let task = Task::ALL
            .into_iter()
            .find(|task| {
                let name = task.as_str();
                prefix == name
                    || prefix
                        .strip_suffix(name)
                        .is_some_and(|rest| rest.ends_with('.'))
            })
            .ok_or_else(|| format!("unknown task in event type '{}'", s))?;

        Ok(Self { task, phase })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Succeeded,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Pass,
    Fail,
    Warning,
}

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
    /// Timestamp in RFC3339 format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Id of the `.triggered` event this event answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggeredid: Option<String>,
    /// Correlation id shared by all events of one delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Event {
    /// Build a new event with a fresh id and the current time
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        data: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            source: source.into(),
            time: Some(Utc::now().to_rfc3339()),
            triggeredid: None,
            context: None,
            data: serde_json::to_value(data)?,
        })
    }

    /// Link this event to the `.triggered` event it answers
    pub fn answering(mut self, triggered: &Event) -> Self {
        self.triggeredid = Some(triggered.id.clone());
        self.context = triggered.context.clone();
        self
    }

    pub fn parsed_type(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }

    /// Decode the data section into a task-specific payload
    pub fn decode_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, RolloutError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| RolloutError::Payload(format!("{}: {}", self.event_type, e)))
    }
}

/// Fields shared by every event's data section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventData {
    /// Pick project/stage/service out of arbitrary data without failing.
    ///
    /// Used to address `.started`/`.finished` events even when the payload
    /// itself is malformed.
    pub fn lenient(data: &serde_json::Value) -> Self {
        let field = |name: &str| {
            data.get(name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            project: field("project"),
            stage: field("stage"),
            service: field("service"),
            ..Self::default()
        }
    }

    /// Project, stage, and service must all be set to DNS labels
    pub fn validate(&self) -> Result<(), RolloutError> {
        Self::require(&[
            ("project", &self.project),
            ("stage", &self.stage),
            ("service", &self.service),
        ])
    }

    /// Project and service must be set; stage may be empty (service-wide tasks)
    pub fn validate_service(&self) -> Result<(), RolloutError> {
        Self::require(&[("project", &self.project), ("service", &self.service)])?;
        if self.stage.is_empty() {
            Ok(())
        } else {
            Self::require(&[("stage", &self.stage)])
        }
    }

    fn require(fields: &[(&str, &String)]) -> Result<(), RolloutError> {
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(RolloutError::Payload(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        if let Some((name, value)) = fields.iter().find(|(_, value)| !is_dns_label(value)) {
            return Err(RolloutError::Payload(format!(
                "{} {:?} is not a valid DNS label",
                name, value
            )));
        }

        Ok(())
    }

    /// Address-only copy, without status, result, or message
    pub fn address(&self) -> Self {
        Self {
            project: self.project.clone(),
            stage: self.stage.clone(),
            service: self.service.clone(),
            ..Self::default()
        }
    }
}

/// Strategy selection carried by deployment, release, and rollback events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentSelection {
    #[serde(
        rename = "deploymentstrategy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deployment_strategy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationChange {
    /// Values to merge into the user chart before deploying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTriggeredData {
    #[serde(flatten)]
    pub base: EventData,
    #[serde(default)]
    pub configuration_change: ConfigurationChange,
    #[serde(default)]
    pub deployment: DeploymentSelection,
}

/// Payload of `release.triggered` and `rollback.triggered`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseTriggeredData {
    #[serde(flatten)]
    pub base: EventData,
    #[serde(default)]
    pub deployment: DeploymentSelection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInfo {
    pub action: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTriggeredData {
    #[serde(flatten)]
    pub base: EventData,
    pub action: ActionInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentFinishedInfo {
    #[serde(rename = "deploymentstrategy")]
    pub deployment_strategy: String,
    #[serde(rename = "deploymentNames", default)]
    pub deployment_names: Vec<String>,
    #[serde(
        rename = "deploymentURIsPublic",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub deployment_uris_public: Vec<String>,
    #[serde(
        rename = "deploymentURIsLocal",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub deployment_uris_local: Vec<String>,
}

/// Payload of every `.finished` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedData {
    #[serde(flatten)]
    pub base: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentFinishedInfo>,
    #[serde(
        rename = "versionToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub version_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trip() {
        let parsed: EventType = "service.delete.finished".parse().unwrap();
        assert_eq!(parsed, EventType::new(Task::ServiceDelete, Phase::Finished));
        assert_eq!(parsed.to_string(), "service.delete.finished");
    }

    #[test]
    fn test_event_type_with_prefix() {
        let parsed: EventType = "sh.example.event.deployment.triggered".parse().unwrap();
        assert_eq!(parsed, EventType::new(Task::Deployment, Phase::Triggered));

        let parsed: EventType = "sh.example.event.service.delete.triggered".parse().unwrap();
        assert_eq!(parsed.task, Task::ServiceDelete);
    }

    #[test]
    fn test_event_type_rejects_unknown() {
        assert!("evaluation.triggered".parse::<EventType>().is_err());
        assert!("deployment.requested".parse::<EventType>().is_err());
        assert!("redeployment.triggered".parse::<EventType>().is_err());
        assert!("deployment".parse::<EventType>().is_err());
    }

    #[test]
    fn test_decode_deployment_triggered() {
        let event = Event {
            id: "1".to_string(),
            event_type: "deployment.triggered".to_string(),
            source: "test".to_string(),
            time: None,
            triggeredid: None,
            context: Some("ctx".to_string()),
            data: json!({
                "project": "sockshop",
                "stage": "dev",
                "service": "carts",
                "configurationChange": {"values": {"image": "carts:0.2.0"}},
                "deployment": {"deploymentstrategy": "duplicate"}
            }),
        };

        let data: DeploymentTriggeredData = event.decode_data().unwrap();
        assert_eq!(data.base.project, "sockshop");
        assert_eq!(
            data.deployment.deployment_strategy.as_deref(),
            Some("duplicate")
        );
        assert!(data.configuration_change.values.is_some());
    }

    #[test]
    fn test_lenient_data_never_fails() {
        let data = EventData::lenient(&json!({"project": 42, "stage": "dev"}));
        assert_eq!(data.project, "");
        assert_eq!(data.stage, "dev");
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_path_like_names() {
        let data = EventData::lenient(&json!({
            "project": "..",
            "stage": "dev",
            "service": "carts"
        }));
        assert!(matches!(data.validate(), Err(RolloutError::Payload(m)) if m.contains("project")));

        let data = EventData::lenient(&json!({"project": "sockshop", "service": "carts/../x"}));
        assert!(matches!(data.validate_service(), Err(RolloutError::Payload(_))));

        let data = EventData::lenient(&json!({"project": "sockshop", "service": "carts"}));
        assert!(data.validate_service().is_ok());
        assert!(EventData::lenient(&json!({
            "project": "sockshop",
            "stage": "Dev",
            "service": "carts"
        }))
        .validate()
        .is_err());
    }

    #[test]
    fn test_finished_data_serialization() {
        let data = FinishedData {
            base: EventData {
                project: "sockshop".to_string(),
                stage: "dev".to_string(),
                service: "carts".to_string(),
                status: Some(Status::Succeeded),
                result: Some(TaskResult::Pass),
                message: None,
            },
            deployment: Some(DeploymentFinishedInfo {
                deployment_strategy: "duplicate".to_string(),
                deployment_names: vec!["primary".to_string()],
                ..Default::default()
            }),
            version_token: Some("abc".to_string()),
        };

        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["result"], "pass");
        assert_eq!(value["deployment"]["deploymentNames"][0], "primary");
        assert_eq!(value["versionToken"], "abc");
        assert!(value["deployment"].get("deploymentURIsPublic").is_none());
    }

    #[test]
    fn test_answering_links_trigger() {
        let triggered = Event::new(
            EventType::new(Task::Release, Phase::Triggered),
            "test",
            json!({}),
        )
        .unwrap();
        let started = Event::new(
            EventType::new(Task::Release, Phase::Started),
            "helm-rollout",
            json!({}),
        )
        .unwrap()
        .answering(&triggered);

        assert_eq!(started.triggeredid.as_deref(), Some(triggered.id.as_str()));
        assert_eq!(started.event_type, "release.started");
    }
}
