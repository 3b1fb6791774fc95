/// Failures of the provisioning workflow
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::NodeRole;
use crate::qbert::ApiError;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0}")]
    AuthFailure(String),

    #[error("Failed to create cluster {cluster}: {reason}")]
    ClusterCreateFailed { cluster: String, reason: String },

    /// `budget` is zero when the cluster was looked up once rather than waited for
    #[error("Cluster {cluster} is not available: {reason}")]
    ClusterNotAvailable {
        cluster: String,
        reason: String,
        budget: Duration,
    },

    #[error("Failed to attach {role} nodes to cluster {cluster} after {attempts} attempts: {last_error}")]
    ClusterAttachFailed {
        cluster: String,
        role: NodeRole,
        attempts: u32,
        last_error: String,
    },

    /// The active master count never settled on the requested number
    #[error("Cluster {cluster} has {observed} active masters, expected {expected}")]
    FailedActiveMasters {
        cluster: String,
        expected: usize,
        observed: usize,
    },

    #[error("Node preparation failed: {detail}{}", log_hint(.log_path))]
    PrepNodeFailed {
        exit_code: Option<i32>,
        detail: String,
        log_path: Option<PathBuf>,
    },

    /// Transport, HTTP or decode failure while reading the registry
    #[error("Management plane unavailable: {0}")]
    RegistryUnavailable(#[source] ApiError),

    #[error("No registered host found for: {}", .ips.join(", "))]
    NodeNotFound { ips: Vec<String> },

    /// Lists the missing items, e.g. "SSH user"
    #[error("Missing SSH details for remote hosts: {}", .0.join(", "))]
    SshInfoMissing(Vec<String>),

    #[error("A multi-master cluster needs: {}", .0.join(", "))]
    MissingVipDetails(Vec<String>),

    #[error("Interrupted while {0}")]
    Cancelled(String),
}

fn log_hint(log_path: &Option<PathBuf>) -> String {
    match log_path {
        Some(path) => format!(" (see {})", path.display()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prep_failure_points_at_log() {
        let err = ClusterError::PrepNodeFailed {
            exit_code: Some(2),
            detail: "ansible-playbook exited with status 2".to_string(),
            log_path: Some(PathBuf::from("/tmp/express.log")),
        };
        assert_eq!(
            err.to_string(),
            "Node preparation failed: ansible-playbook exited with status 2 (see /tmp/express.log)"
        );
    }

    #[test]
    fn test_attach_failure_names_role_and_attempts() {
        let err = ClusterError::ClusterAttachFailed {
            cluster: "c-1".to_string(),
            role: NodeRole::Worker,
            attempts: 5,
            last_error: "status 500".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("worker"));
        assert!(message.contains("5 attempts"));
        assert!(message.contains("status 500"));
    }

    #[test]
    fn test_node_not_found_lists_ips() {
        let err = ClusterError::NodeNotFound {
            ips: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No registered host found for: 10.0.0.1, 10.0.0.2"
        );
    }
}
