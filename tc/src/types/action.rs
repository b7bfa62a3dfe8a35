// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::types::CmdLineArgs;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Control verdict of a generic (`gact`) action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Pass,
    Drop,
}

impl Display for ControlAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlAction::Pass => write!(f, "pass"),
            ControlAction::Drop => write!(f, "drop"),
        }
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pass" => Ok(ControlAction::Pass),
            "drop" => Ok(ControlAction::Drop),
            other => Err(format!("unknown control action: {other:?}")),
        }
    }
}

/// A TC filter action. Only generic actions are used by this system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Generic(ControlAction),
}

impl Action {
    #[must_use]
    pub fn control(&self) -> ControlAction {
        match self {
            Action::Generic(control) => *control,
        }
    }
}

impl CmdLineArgs for Action {
    fn cmd_args(&self) -> Vec<String> {
        match self {
            Action::Generic(control) => {
                vec!["action".to_owned(), "gact".to_owned(), control.to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_action_cmd_args() {
        assert_eq!(
            Action::Generic(ControlAction::Pass).cmd_args(),
            vec!["action".to_owned(), "gact".to_owned(), "pass".to_owned()]
        );
        assert_eq!(
            Action::Generic(ControlAction::Drop).cmd_args(),
            vec!["action".to_owned(), "gact".to_owned(), "drop".to_owned()]
        );
    }

    #[test]
    fn control_action_round_trips_through_str() {
        for control in [ControlAction::Pass, ControlAction::Drop] {
            assert_eq!(control.to_string().parse::<ControlAction>().unwrap(), control);
        }
        assert!("trap".parse::<ControlAction>().is_err());
    }
}
