//! Rendering candidate sets into install commands.

use serde::{Deserialize, Serialize};

use crate::domain::CandidateSet;

/// Placeholder replaced by the quoted package list.
pub const PACKAGES_PLACEHOLDER: &str = "{packages}";

/// Shell command templates used to build an attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandTemplates {
    pub package_install: String,
    pub system_install: String,
    /// Run after installation when the attempt covers the whole waiting list.
    pub verify_command: Option<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            package_install: "python -m pip install --no-input --disable-pip-version-check {packages}"
                .to_string(),
            system_install:
                "apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {packages}"
                    .to_string(),
            verify_command: None,
        }
    }
}

impl CommandTemplates {
    pub fn validate(&self) -> Result<(), String> {
        for (name, template) in [
            ("package_install", &self.package_install),
            ("system_install", &self.system_install),
        ] {
            if !template.contains(PACKAGES_PLACEHOLDER) {
                return Err(format!("{name} must contain {PACKAGES_PLACEHOLDER}"));
            }
        }
        Ok(())
    }
}

/// Quote one argument for `sh`.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// The concrete shell command for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    steps: Vec<String>,
}

impl InstallPlan {
    /// System packages first, then packages, then verification.
    pub fn render(set: &CandidateSet, templates: &CommandTemplates) -> Self {
        let mut steps = Vec::new();

        if !set.system_packages.is_empty() {
            let quoted: Vec<String> = set.system_packages.iter().map(|s| shell_quote(s)).collect();
            steps.push(
                templates
                    .system_install
                    .replace(PACKAGES_PLACEHOLDER, &quoted.join(" ")),
            );
        }

        if !set.packages.is_empty() {
            let quoted: Vec<String> = set
                .packages
                .iter()
                .map(|c| shell_quote(&c.to_string()))
                .collect();
            steps.push(
                templates
                    .package_install
                    .replace(PACKAGES_PLACEHOLDER, &quoted.join(" ")),
            );
        }

        if set.covers_waiting_list {
            if let Some(verify) = &templates.verify_command {
                steps.push(verify.clone());
            }
        }

        Self { steps }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// All steps chained with `&&`; `true` when there is nothing to do.
    pub fn command(&self) -> String {
        if self.steps.is_empty() {
            return "true".to_string();
        }
        self.steps
            .iter()
            .map(|s| format!("( {s} )"))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}
