//! Role-based tool allowlists.
//!
//! Agents never see the full catalog: each role bucket maps to an
//! allowlist, and the schemas sent to the model are the intersection of
//! the registry with that list. Platform introspection tools are granted
//! to every bucket.

use std::collections::HashSet;

use crate::model::RoleBucket;

/// Introspection tools available to every role.
pub const PLATFORM_TOOLS: [&str; 6] = [
    "platform_agents",
    "platform_missions",
    "platform_memory_search",
    "platform_metrics",
    "platform_sessions",
    "platform_workflows",
];

const COMMON_READ: [&str; 5] = [
    "code_read",
    "code_search",
    "list_files",
    "memory_search",
    "memory_store",
];

/// Allowlisted tool names for a role bucket (platform tools included).
#[must_use]
pub fn role_tools(bucket: RoleBucket) -> HashSet<&'static str> {
    let specific: &[&str] = match bucket {
        RoleBucket::Product => &["get_project_context", "screenshot"],
        RoleBucket::Architecture => &[
            "deep_search",
            "get_project_context",
            "git_log",
            "git_diff",
        ],
        RoleBucket::Ux => &["screenshot", "get_project_context"],
        RoleBucket::Dev => &[
            "code_write",
            "code_edit",
            "git_status",
            "git_log",
            "git_diff",
            "git_commit",
            "deep_search",
            "get_project_context",
            "build",
            "test",
            "docker_build",
            "screenshot",
        ],
        RoleBucket::Qa => &[
            "code_write",
            "screenshot",
            "build",
            "test",
            "get_project_context",
            "git_diff",
            "git_log",
        ],
        RoleBucket::Devops => &[
            "code_write",
            "code_edit",
            "git_status",
            "git_log",
            "git_diff",
            "git_commit",
            "docker_build",
            "build",
            "test",
            "get_project_context",
        ],
        RoleBucket::Security => &[
            "deep_search",
            "get_project_context",
            "git_log",
            "git_diff",
        ],
        RoleBucket::Cdp => &["get_project_context"],
    };

    COMMON_READ
        .iter()
        .chain(specific.iter())
        .chain(PLATFORM_TOOLS.iter())
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_can_write_qa_cannot_edit() {
        let dev = role_tools(RoleBucket::Dev);
        assert!(dev.contains("code_write"));
        assert!(dev.contains("code_edit"));
        assert!(dev.contains("build"));

        let qa = role_tools(RoleBucket::Qa);
        assert!(qa.contains("test"));
        assert!(!qa.contains("code_edit"));
        assert!(!qa.contains("git_commit"));
    }

    #[test]
    fn platform_tools_universal() {
        for bucket in [
            RoleBucket::Product,
            RoleBucket::Architecture,
            RoleBucket::Ux,
            RoleBucket::Dev,
            RoleBucket::Qa,
            RoleBucket::Devops,
            RoleBucket::Security,
            RoleBucket::Cdp,
        ] {
            let tools = role_tools(bucket);
            for name in PLATFORM_TOOLS {
                assert!(tools.contains(name), "{bucket:?} missing {name}");
            }
            for name in COMMON_READ {
                assert!(tools.contains(name), "{bucket:?} missing {name}");
            }
        }
    }
}
