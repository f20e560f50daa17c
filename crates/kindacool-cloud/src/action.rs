//! Action types for cloud resource management

use crate::graph::{ResourceGraph, ResourceKind};
use crate::state::StackState;
use serde::{Deserialize, Serialize};

/// Represents a planned action for a cloud resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier for the action (the resource key)
    pub id: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Resource type (e.g., "instance", "floating-ip", "command")
    pub resource_type: String,

    /// Resource name
    pub resource_id: String,

    /// Description of the action
    pub description: String,
}

impl Action {
    fn new(action_type: ActionType, kind: &str, name: &str) -> Self {
        let id = format!("{}:{}", kind, name);
        Self {
            description: format!("{} {}", action_type, id),
            id,
            action_type,
            resource_type: kind.to_string(),
            resource_id: name.to_string(),
        }
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// Read a data resource
    Read,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::Read => write!(f, "read"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Result of applying actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully applied actions
    pub succeeded: Vec<ActionResult>,

    /// Failed actions
    pub failed: Vec<ActionResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, action_id: String, message: String) {
        self.succeeded.push(ActionResult {
            action_id,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, action_id: String, error: String) {
        self.failed.push(ActionResult {
            action_id,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// ID of the action
    pub action_id: String,

    /// Whether the action succeeded
    pub success: bool,

    /// Success message
    pub message: String,

    /// Error message if failed
    pub error: Option<String>,
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions
            .iter()
            .any(|a| !matches!(a.action_type, ActionType::NoOp | ActionType::Read));
        Self {
            actions,
            has_changes,
        }
    }

    /// Diff a declared graph against recorded state
    ///
    /// Resources already recorded are planned as updates; whether an update actually
    /// changes anything is only known once its inputs resolve during apply.
    pub fn for_graph(graph: &ResourceGraph, state: Option<&StackState>) -> Self {
        let mut actions: Vec<Action> = graph
            .iter()
            .map(|resource| {
                let recorded = state.is_some_and(|s| s.get_resource(&resource.key()).is_some());
                let action_type = if resource.kind.is_data() {
                    ActionType::Read
                } else if recorded {
                    ActionType::Update
                } else {
                    ActionType::Create
                };
                Action::new(action_type, resource.kind.as_str(), &resource.name)
            })
            .collect();

        if let Some(state) = state {
            for key in state.deletion_order() {
                if graph.contains_key(&key) {
                    continue;
                }
                let Some(recorded) = state.get_resource(&key) else {
                    continue;
                };
                let name = key
                    .split_once(':')
                    .map(|(_, name)| name)
                    .unwrap_or(key.as_str());
                actions.push(Action::new(
                    ActionType::Delete,
                    &recorded.resource_type,
                    name,
                ));
            }
        }

        Self::new(actions)
    }

    /// Teardown plan for everything recorded in a stack
    pub fn for_destroy(state: &StackState) -> Self {
        let actions = state
            .deletion_order()
            .into_iter()
            .filter_map(|key| {
                let recorded = state.get_resource(&key)?;
                let name = key.split_once(':').map(|(_, n)| n.to_string())?;
                let skip = recorded
                    .resource_type
                    .parse::<ResourceKind>()
                    .map(|k| k.is_data())
                    .unwrap_or(false);
                (!skip).then(|| Action::new(ActionType::Delete, &recorded.resource_type, &name))
            })
            .collect();
        Self::new(actions)
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len()
                + self.actions_by_type(ActionType::Read).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}
