//! Actions proposed by a policy oracle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The next step the controller should take after a learning failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Retry `package` with `excluded_version` removed from its range.
    Narrow {
        package: String,
        excluded_version: String,
    },
    /// Replace `package` with `alternative`, keeping its version range.
    Substitute { package: String, alternative: String },
    /// Install a system package before the package set.
    AddSystemDependency { name: String },
    /// Continue without `package`.
    Skip { package: String },
    /// No viable action.
    GiveUp,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Narrow {
                package,
                excluded_version,
            } => write!(f, "narrow {package} !={excluded_version}"),
            Action::Substitute {
                package,
                alternative,
            } => write!(f, "substitute {package} -> {alternative}"),
            Action::AddSystemDependency { name } => write!(f, "add system dependency {name}"),
            Action::Skip { package } => write!(f, "skip {package}"),
            Action::GiveUp => f.write_str("give up"),
        }
    }
}

/// One oracle decision, as recorded in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Sequence number of the attempt whose failure prompted the decision.
    pub after_attempt: u32,
    pub action: Action,
    /// False when the action left the constraint store unchanged.
    pub applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_format() {
        let action = Action::Narrow {
            package: "pkg-a".into(),
            excluded_version: "2.0".into(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "narrow");
        assert_eq!(json["excluded_version"], "2.0");

        let give_up: Action = serde_json::from_str(r#"{"action":"give_up"}"#).unwrap();
        assert_eq!(give_up, Action::GiveUp);
    }

    #[test]
    fn test_action_display() {
        let action = Action::Substitute {
            package: "psycopg2".into(),
            alternative: "psycopg2-binary".into(),
        };
        assert_eq!(action.to_string(), "substitute psycopg2 -> psycopg2-binary");
    }
}
