use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Action named by a requester when it submits a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Run the command, or continue with the stage's default action.
    Execute,
    Cancel,
    Prev,
    Next,
    Complete,
    /// Any value the protocol does not define. Decoded only, never sent.
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Maps the action onto the stage-navigation set, if it belongs there.
    pub fn allowed_action(self) -> Option<AllowedAction> {
        match self {
            Action::Prev => Some(AllowedAction::Prev),
            Action::Next => Some(AllowedAction::Next),
            Action::Complete => Some(AllowedAction::Complete),
            Action::Execute | Action::Cancel | Action::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Execute => "execute",
            Action::Cancel => "cancel",
            Action::Prev => "prev",
            Action::Next => "next",
            Action::Complete => "complete",
            Action::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AllowedAction> for Action {
    fn from(action: AllowedAction) -> Self {
        match action {
            AllowedAction::Prev => Action::Prev,
            AllowedAction::Next => Action::Next,
            AllowedAction::Complete => Action::Complete,
        }
    }
}

/// Actions a stage can offer to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowedAction {
    Prev,
    Next,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Executing,
    Completed,
    Canceled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Executing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Executing => "executing",
            Status::Completed => "completed",
            Status::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousStage {
    None,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStage {
    /// More stages follow; `next` is the default.
    NonFinal,
    /// This is the last stage; `complete` is the default.
    Final,
    /// More stages may follow but the requester can also finish now.
    NonFinalOrComplete,
}

/// The navigation a stage offers, plus the action an implicit `execute`
/// resolves to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedActions {
    #[serde(default)]
    actions: BTreeSet<AllowedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execute: Option<AllowedAction>,
}

impl AllowedActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_stage(previous: PreviousStage, next: NextStage) -> Self {
        let mut actions = Self::new();
        if previous == PreviousStage::Exists {
            actions = actions.with(AllowedAction::Prev);
        }
        match next {
            NextStage::NonFinal => actions.with_default(AllowedAction::Next),
            NextStage::Final => actions.with_default(AllowedAction::Complete),
            NextStage::NonFinalOrComplete => actions
                .with(AllowedAction::Complete)
                .with_default(AllowedAction::Next),
        }
    }

    pub fn with(mut self, action: AllowedAction) -> Self {
        self.actions.insert(action);
        self
    }

    /// Offers `action` and makes it the stage's default.
    pub fn with_default(mut self, action: AllowedAction) -> Self {
        self.actions.insert(action);
        self.execute = Some(action);
        self
    }

    pub fn contains(&self, action: AllowedAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn execute_action(&self) -> Option<AllowedAction> {
        self.execute
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = AllowedAction> + '_ {
        self.actions.iter().copied()
    }
}
