//! Path validation.
//!
//! Paths are normalized lexically, never touching the filesystem, then
//! checked against the deny-list and the allow-list of base directories.
//! Prefix checks compare whole components: `/sys` denies `/sys/kernel` but
//! not `/system`.

use tracing::warn;

use crate::config::PathPolicy;

use super::command::ValidationVerdict;

/// Always denied, in addition to any configured entries.
const RESTRICTED_PATHS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    "/etc/ssh/sshd_config",
    "/root/.ssh",
    "/proc/kcore",
    "/dev/mem",
    "/dev/kmem",
    "/sys",
    "/boot/grub",
];

#[derive(Debug, Clone)]
pub struct PathValidator {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl Default for PathValidator {
    fn default() -> Self {
        Self::new(PathPolicy::default())
    }
}

impl PathValidator {
    /// An empty allow-list falls back to the default base directories.
    pub fn new(policy: PathPolicy) -> Self {
        let allowed = if policy.allowed_paths.is_empty() {
            PathPolicy::default().allowed_paths
        } else {
            policy.allowed_paths
        };

        let mut blocked: Vec<String> = RESTRICTED_PATHS.iter().map(|p| p.to_string()).collect();
        for extra in policy.blocked_paths {
            if !blocked.contains(&extra) {
                blocked.push(extra);
            }
        }

        Self {
            allowed: allowed.iter().map(|p| normalize_path(p)).collect(),
            blocked: blocked.iter().map(|p| normalize_path(p)).collect(),
        }
    }

    pub fn is_valid_path(&self, path: &str) -> bool {
        self.verdict(path).allowed
    }

    pub fn verdict(&self, path: &str) -> ValidationVerdict {
        if path.trim().is_empty() {
            return ValidationVerdict::deny("empty path");
        }

        let normalized = normalize_path(path);

        if normalized.split('/').any(|c| c == "..") {
            warn!("Path traversal attempt detected: {}", path);
            return ValidationVerdict::deny("path traversal");
        }

        if let Some(denied) = self.blocked.iter().find(|b| has_prefix(&normalized, b)) {
            warn!("Access to restricted path blocked: {}", normalized);
            return ValidationVerdict::deny(format!("restricted path '{}'", denied));
        }

        if !self.allowed.iter().any(|a| has_prefix(&normalized, a)) {
            warn!("Path outside allowed directories: {}", normalized);
            return ValidationVerdict::deny("outside allowed directories");
        }

        ValidationVerdict::allow()
    }

    pub fn normalize_path(&self, path: &str) -> String {
        normalize_path(path)
    }

    pub fn allowed_paths(&self) -> &[String] {
        &self.allowed
    }
}

/// Resolve `.` and `..` segments and collapse repeated separators.
///
/// `..` above the root of an absolute path is dropped; leading `..` in a
/// relative path is kept.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

fn has_prefix(path: &str, base: &str) -> bool {
    if base == "/" {
        return path.starts_with('/');
    }
    path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod normalize {
        use super::*;

        #[test]
        fn test_resolves_parent_segments() {
            assert_eq!(normalize_path("/var/../etc/passwd"), "/etc/passwd");
            assert_eq!(normalize_path("/var/./app//data/"), "/var/app/data");
            assert_eq!(normalize_path("/home/u/a/b/../../c"), "/home/u/c");
        }

        #[test]
        fn test_parent_of_root_is_root() {
            assert_eq!(normalize_path("/../../etc"), "/etc");
            assert_eq!(normalize_path("/.."), "/");
        }

        #[test]
        fn test_relative_leading_parent_kept() {
            assert_eq!(normalize_path("../x"), "../x");
            assert_eq!(normalize_path("a/../../b"), "../b");
            assert_eq!(normalize_path("a/./b"), "a/b");
        }
    }

    mod validate {
        use super::*;

        #[test]
        fn test_allowed_base() {
            let v = PathValidator::default();
            assert!(v.is_valid_path("/var/app/data.txt"));
            assert!(v.is_valid_path("/tmp"));
            assert!(v.is_valid_path("/usr/local/bin/tool"));
        }

        #[test]
        fn test_outside_allow_list() {
            let v = PathValidator::default();
            assert!(!v.is_valid_path("/root/.ssh/id_rsa"));
            assert!(!v.is_valid_path("/usr/bin/env"));
            assert_eq!(
                v.verdict("/srv/www").reason,
                "outside allowed directories"
            );
        }

        #[test]
        fn test_traversal_into_denied_path() {
            let v = PathValidator::default();
            assert!(!v.is_valid_path("/var/../etc/shadow"));
            assert!(!v.is_valid_path("/tmp/../../etc/passwd"));
        }

        #[test]
        fn test_relative_traversal_rejected() {
            let v = PathValidator::default();
            assert_eq!(v.verdict("../../etc").reason, "path traversal");
        }

        #[test]
        fn test_denied_even_under_allowed_base() {
            let v = PathValidator::new(PathPolicy {
                allowed_paths: vec!["/".to_string()],
                blocked_paths: vec!["/var/secrets".to_string()],
            });
            assert!(!v.is_valid_path("/etc/shadow"));
            assert!(!v.is_valid_path("/sys/kernel/debug"));
            assert!(!v.is_valid_path("/var/secrets/key.pem"));
            assert!(v.is_valid_path("/var/log/syslog"));
            assert!(v.is_valid_path("/system/notes"));
        }

        #[test]
        fn test_prefix_is_component_wise() {
            let v = PathValidator::default();
            assert!(!v.is_valid_path("/homeless/file"));
            assert!(v.is_valid_path("/home/user/file"));
        }

        #[test]
        fn test_empty_rejected() {
            let v = PathValidator::default();
            assert!(!v.is_valid_path(""));
            assert!(!v.is_valid_path("  "));
        }

        #[test]
        fn test_empty_allow_list_uses_defaults() {
            let v = PathValidator::new(PathPolicy {
                allowed_paths: Vec::new(),
                blocked_paths: Vec::new(),
            });
            assert_eq!(v.allowed_paths().len(), 5);
            assert!(v.is_valid_path("/opt/app"));
        }
    }
}
