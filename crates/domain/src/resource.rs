use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tollgate_core::{AppError, AppResult};

use crate::ticket::{DecisionOverrides, OperationType};

/// Deterministic address of one external resource.
///
/// Chosen when the request is recorded, so every redelivery of the same job
/// targets the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    cluster: String,
    namespace: String,
    name: String,
}

impl ResourceIdentity {
    /// Creates a validated identity.
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> AppResult<Self> {
        let identity = Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Checks that every component is non-empty and free of separators.
    pub fn validate(&self) -> AppResult<()> {
        for (label, value) in [
            ("cluster", self.cluster.as_str()),
            ("namespace", self.namespace.as_str()),
            ("name", self.name.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "resource {label} must not be empty"
                )));
            }

            if value.contains('/') {
                return Err(AppError::Validation(format!(
                    "resource {label} '{value}' must not contain '/'"
                )));
            }
        }

        Ok(())
    }

    /// Returns the cluster.
    #[must_use]
    pub fn cluster(&self) -> &str {
        self.cluster.as_str()
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the `cluster/namespace/name` key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.cluster, self.namespace, self.name)
    }

    /// Returns a copy placed on another cluster.
    #[must_use]
    pub fn on_cluster(&self, cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl Display for ResourceIdentity {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}

/// Power action against one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    /// Power on.
    Start,
    /// Power off.
    Stop,
    /// Power cycle.
    Restart,
}

impl PowerAction {
    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

/// Intent carried in the payload of a `*_requested` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ResourceOperation {
    /// Create `identity` from `spec`.
    Create {
        /// Target resource.
        identity: ResourceIdentity,
        /// Requested spec snapshot.
        spec: Value,
    },
    /// Delete `identity`.
    Delete {
        /// Target resource.
        identity: ResourceIdentity,
    },
    /// Apply a power action to `identity`.
    Power {
        /// Target resource.
        identity: ResourceIdentity,
        /// Requested action.
        action: PowerAction,
    },
}

impl ResourceOperation {
    /// Returns the single operation type.
    #[must_use]
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Create { .. } => OperationType::Create,
            Self::Delete { .. } => OperationType::Delete,
            Self::Power { .. } => OperationType::Power,
        }
    }

    /// Returns the target resource.
    #[must_use]
    pub fn identity(&self) -> &ResourceIdentity {
        match self {
            Self::Create { identity, .. }
            | Self::Delete { identity }
            | Self::Power { identity, .. } => identity,
        }
    }

    /// Validates the operation payload.
    pub fn validate(&self) -> AppResult<()> {
        self.identity().validate()?;

        if let Self::Create { spec, .. } = self
            && !spec.is_object()
        {
            return Err(AppError::Validation(
                "create operation spec must be a JSON object".to_owned(),
            ));
        }

        Ok(())
    }

    /// Applies approver overrides; each set override replaces the requested value.
    ///
    /// Deletes keep their confirmed cluster.
    #[must_use]
    pub fn with_overrides(&self, overrides: &DecisionOverrides) -> Self {
        let retarget = |identity: &ResourceIdentity| match overrides.selected_cluster.as_deref() {
            Some(cluster) if !cluster.trim().is_empty() => identity.on_cluster(cluster),
            _ => identity.clone(),
        };

        match self {
            Self::Create { identity, spec } => Self::Create {
                identity: retarget(identity),
                spec: overrides
                    .selected_spec
                    .clone()
                    .unwrap_or_else(|| spec.clone()),
            },
            Self::Delete { identity } => Self::Delete {
                identity: identity.clone(),
            },
            Self::Power { identity, action } => Self::Power {
                identity: retarget(identity),
                action: *action,
            },
        }
    }

    /// Decodes an operation from an event payload.
    pub fn decode(payload: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(payload).map_err(|error| {
            AppError::Validation(format!("failed to decode resource operation: {error}"))
        })
    }
}

/// Payload of a batch parent's `batch_*_requested` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    /// Batch operation.
    pub operation: OperationType,
    /// Number of children created with the batch.
    pub child_count: u32,
}

/// Last known state of a resource, maintained by the execution worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Create call in flight.
    Creating,
    /// Resource exists and runs.
    Running,
    /// Resource exists and is powered off.
    Stopped,
    /// Delete call in flight.
    Deleting,
    /// Resource no longer exists.
    Deleted,
    /// Last operation failed.
    Error,
}

impl ResourceState {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "creating" => Ok(Self::Creating),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "deleting" => Ok(Self::Deleting),
            "deleted" => Ok(Self::Deleted),
            "error" => Ok(Self::Error),
            _ => Err(AppError::Validation(format!(
                "unknown resource state '{value}'"
            ))),
        }
    }

    /// Returns the state recorded while `operation` is in flight, if any.
    #[must_use]
    pub fn in_flight(operation: &ResourceOperation) -> Option<Self> {
        match operation {
            ResourceOperation::Create { .. } => Some(Self::Creating),
            ResourceOperation::Delete { .. } => Some(Self::Deleting),
            ResourceOperation::Power { .. } => None,
        }
    }

    /// Returns the state recorded after `operation` succeeded.
    #[must_use]
    pub fn after_success(operation: &ResourceOperation) -> Self {
        match operation {
            ResourceOperation::Create { .. } => Self::Running,
            ResourceOperation::Delete { .. } => Self::Deleted,
            ResourceOperation::Power { action, .. } => match action {
                PowerAction::Start | PowerAction::Restart => Self::Running,
                PowerAction::Stop => Self::Stopped,
            },
        }
    }
}
