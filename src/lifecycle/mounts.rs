//! Declarative shared-folder mount topology.
//!
//! The expected mount set for an agent is a pure function of its
//! [`AgentSharedFolderConfig`] and the set of permitted peers that expose a
//! volume. Comparison happens on `(source, target, mode)` triples restricted
//! to shared-folder targets; every other mount on the container is preserved
//! verbatim.

use crate::constants::{SHARED_IN_PREFIX, SHARED_OUT_TARGET};
use crate::models::AgentSharedFolderConfig;
use std::collections::BTreeSet;

/// Name of the volume backing an agent's exposed shared folder.
pub fn shared_volume_name(agent: &str) -> String {
    format!("agent-{agent}-shared")
}

/// One shared-folder volume mount, identified by source volume, container
/// target, and access mode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MountSpec {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl MountSpec {
    /// Docker bind string (`source:target[:ro]`).
    pub fn to_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Whether a container path belongs to the shared-folder topology.
pub fn is_shared_target(target: &str) -> bool {
    target == SHARED_OUT_TARGET || target.starts_with(&format!("{SHARED_IN_PREFIX}/"))
}

/// Whether a bind string targets a shared-folder path.
pub fn is_shared_bind(bind: &str) -> bool {
    bind_target(bind).map(is_shared_target).unwrap_or(false)
}

/// The container path of a `source:target[:mode]` bind string.
fn bind_target(bind: &str) -> Option<&str> {
    let mut parts = bind.split(':');
    let _source = parts.next()?;
    parts.next()
}

/// Computes the expected shared-folder mounts.
///
/// The agent's own volume lands writable at `/shared-out`; peer volumes are
/// consumed read-only under `/shared-in/`.
pub fn expected_shared_mounts(
    config: &AgentSharedFolderConfig,
    exposing_peers: &[String],
) -> BTreeSet<MountSpec> {
    let mut mounts = BTreeSet::new();
    if config.expose_enabled {
        mounts.insert(MountSpec {
            source: shared_volume_name(&config.agent_name),
            target: SHARED_OUT_TARGET.to_string(),
            read_only: false,
        });
    }
    if config.consume_enabled {
        for peer in exposing_peers {
            mounts.insert(MountSpec {
                source: shared_volume_name(peer),
                target: format!("{SHARED_IN_PREFIX}/{peer}"),
                read_only: true,
            });
        }
    }
    mounts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(agent: &str, expose: bool, consume: bool) -> AgentSharedFolderConfig {
        let mut c = AgentSharedFolderConfig::disabled(agent);
        c.expose_enabled = expose;
        c.consume_enabled = consume;
        c
    }

    #[test]
    fn disabled_config_expects_no_shared_mounts() {
        let expected = expected_shared_mounts(&config("alice", false, false), &[]);
        assert!(expected.is_empty());
    }

    #[test]
    fn expose_mounts_own_volume_writable() {
        let expected = expected_shared_mounts(&config("alice", true, false), &[]);
        assert_eq!(expected.len(), 1);
        let mount = expected.iter().next().unwrap();
        assert_eq!(mount.source, "agent-alice-shared");
        assert_eq!(mount.target, "/shared-out");
        assert!(!mount.read_only);
    }

    #[test]
    fn consume_mounts_each_exposing_peer_read_only() {
        let expected = expected_shared_mounts(
            &config("alice", true, true),
            &["bob".to_string(), "carol".to_string()],
        );
        assert_eq!(expected.len(), 3);
        assert!(expected.contains(&MountSpec {
            source: "agent-bob-shared".to_string(),
            target: "/shared-in/bob".to_string(),
            read_only: true,
        }));
        assert!(expected.contains(&MountSpec {
            source: "agent-carol-shared".to_string(),
            target: "/shared-in/carol".to_string(),
            read_only: true,
        }));
    }

    #[test]
    fn consume_without_exposing_peers_adds_nothing() {
        let expected = expected_shared_mounts(&config("alice", false, true), &[]);
        assert!(expected.is_empty());
    }

    #[test]
    fn shared_targets_are_recognized() {
        assert!(is_shared_target("/shared-out"));
        assert!(is_shared_target("/shared-in/bob"));
        assert!(!is_shared_target("/workspace"));
        assert!(!is_shared_target("/shared-inbox"));
    }

    #[test]
    fn bind_strings_round_trip_mode_and_target() {
        let rw = MountSpec {
            source: "agent-alice-shared".to_string(),
            target: "/shared-out".to_string(),
            read_only: false,
        };
        assert_eq!(rw.to_bind(), "agent-alice-shared:/shared-out");

        let ro = MountSpec {
            source: "agent-bob-shared".to_string(),
            target: "/shared-in/bob".to_string(),
            read_only: true,
        };
        assert_eq!(ro.to_bind(), "agent-bob-shared:/shared-in/bob:ro");

        assert!(is_shared_bind("agent-alice-shared:/shared-out"));
        assert!(is_shared_bind("agent-bob-shared:/shared-in/bob:ro"));
        assert!(!is_shared_bind("/home/user/workspaces/alice:/workspace"));
    }

    #[test]
    fn divergence_detected_after_config_change() {
        // A container running with no shared mounts while the config now
        // exposes and consumes must be recreated.
        let actual: BTreeSet<MountSpec> = BTreeSet::new();
        let expected =
            expected_shared_mounts(&config("alice", true, true), &["bob".to_string()]);
        assert_ne!(actual, expected);
        assert_eq!(expected.len(), 2);
    }
}
