//! User-facing messages written to deployment logs

use crate::i18n::MessageFormatter;

/// A log message and the values it interpolates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RunningJob { id: i64 },
    Deployed { port: u16 },
    Undeployed,
    ResourceNotFound { kind: String, name: String },
    ResourceExists { kind: String, name: String },
    DeploymentFailed { error: String },
    DeploymentMissing { id: i64 },
    UnsupportedTarget { kind: String },
    CredentialMissing,
    JobExpired { id: i64 },
}

impl Message {
    /// Catalog key; doubles as the English template
    pub fn key(&self) -> &'static str {
        match self {
            Message::RunningJob { .. } => "Running job for deployment %(id)s",
            Message::Deployed { .. } => "Successfully deployed as a service (port=%(port)s)",
            Message::Undeployed => "Successfully deleted deployment.",
            Message::ResourceNotFound { .. } => "%(kind)s %(name)s not found.",
            Message::ResourceExists { .. } => "%(kind)s %(name)s already exists.",
            Message::DeploymentFailed { .. } => "Error in deployment: %(error)s",
            Message::DeploymentMissing { .. } => "Deployment information with id=%(id)s not found",
            Message::UnsupportedTarget { .. } => "Deployment target %(type)s not supported",
            Message::CredentialMissing => "No authentication info configured in deployment target",
            Message::JobExpired { .. } => "Job for deployment %(id)s expired before it could run",
        }
    }

    pub fn vars(&self) -> Vec<(&'static str, String)> {
        match self {
            Message::RunningJob { id }
            | Message::DeploymentMissing { id }
            | Message::JobExpired { id } => {
                vec![("id", id.to_string())]
            }
            Message::Deployed { port } => vec![("port", port.to_string())],
            Message::ResourceNotFound { kind, name } | Message::ResourceExists { kind, name } => {
                vec![("kind", kind.clone()), ("name", name.clone())]
            }
            Message::DeploymentFailed { error } => vec![("error", error.clone())],
            Message::UnsupportedTarget { kind } => vec![("type", kind.clone())],
            Message::Undeployed | Message::CredentialMissing => Vec::new(),
        }
    }

    pub fn render(&self, formatter: &dyn MessageFormatter, locale: &str) -> String {
        formatter.translate(locale, self.key(), &self.vars())
    }
}
