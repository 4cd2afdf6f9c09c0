//! Concrete policies for the Linux families we recognize.

use once_cell::sync::OnceCell;

use super::{marker_exists, CapabilityTag, Policy};
use crate::exec::CommandRunner;

/// Red Hat family (RHEL, Fedora, CentOS and derivatives).
pub struct RedHatPolicy {
    packages: OnceCell<Vec<String>>,
    runner: CommandRunner,
}

impl RedHatPolicy {
    pub fn new() -> Self {
        Self { packages: OnceCell::new(), runner: CommandRunner::new() }
    }
}

impl Default for RedHatPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for RedHatPolicy {
    fn name(&self) -> &'static str {
        "redhat"
    }

    fn matches_host(&self) -> bool {
        marker_exists("/etc/redhat-release")
    }

    fn eligible_tags(&self) -> &[CapabilityTag] {
        &[CapabilityTag::RedHat]
    }

    fn package_list(&self) -> &[String] {
        self.packages.get_or_init(|| {
            query_packages(&self.runner, "rpm -qa --queryformat '%{NAME} %{VERSION}-%{RELEASE}\\n'")
        })
    }
}

/// Debian family; Ubuntu plugins are valid here as well.
pub struct DebianPolicy {
    packages: OnceCell<Vec<String>>,
    runner: CommandRunner,
}

impl DebianPolicy {
    pub fn new() -> Self {
        Self { packages: OnceCell::new(), runner: CommandRunner::new() }
    }
}

impl Default for DebianPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for DebianPolicy {
    fn name(&self) -> &'static str {
        "debian"
    }

    fn matches_host(&self) -> bool {
        marker_exists("/etc/debian_version")
    }

    fn eligible_tags(&self) -> &[CapabilityTag] {
        &[CapabilityTag::Debian, CapabilityTag::Ubuntu]
    }

    fn package_list(&self) -> &[String] {
        self.packages.get_or_init(|| {
            query_packages(&self.runner, "dpkg-query -W -f='${Package} ${Version}\\n'")
        })
    }
}

/// Run a package manager query, returning one line per package.
///
/// A missing or failing package manager yields an empty list; package
/// lookups then simply find nothing.
fn query_packages(runner: &CommandRunner, cmdline: &str) -> Vec<String> {
    match runner.run(cmdline, None) {
        Ok(outcome) if outcome.success() => outcome
            .output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Ok(outcome) => {
            tracing::debug!(cmdline, status = %outcome.status, "package query failed");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(cmdline, error = %e, "package query failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_list_is_memoized() {
        // The OnceCell guarantees the query runs at most once; a second
        // call must return the identical slice.
        let policy = DebianPolicy::new();
        let first = policy.package_list().as_ptr();
        let second = policy.package_list().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_family_tags() {
        assert_eq!(
            DebianPolicy::new().eligible_tags(),
            &[CapabilityTag::Debian, CapabilityTag::Ubuntu]
        );
        assert_eq!(RedHatPolicy::new().eligible_tags(), &[CapabilityTag::RedHat]);
    }
}
