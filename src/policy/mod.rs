//! Platform policies.
//!
//! A [`Policy`] is the platform-specific strategy governing plugin
//! eligibility, archive format and checksum algorithm. Exactly one
//! policy is selected per run by [`detect`]; the engine owns it for the
//! duration of the run and never re-evaluates detection.

mod linux;

pub use linux::{DebianPolicy, RedHatPolicy};

use std::io::Write;
use std::path::Path;

use crate::archive::ArchiveFormat;

/// Platform-family label a plugin declares itself valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityTag {
    RedHat,
    Debian,
    Ubuntu,
    /// Valid on any platform; always eligible.
    Independent,
}

impl std::fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RedHat => "redhat",
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
            Self::Independent => "independent",
        };
        f.write_str(name)
    }
}

/// Checksum algorithm for the final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// Operator identification gathered during pre-work.
#[derive(Debug, Clone, Default)]
pub struct Identification {
    pub operator_name: Option<String>,
    pub ticket_number: Option<String>,
}

/// Platform-specific strategy object.
///
/// Implementations are immutable after detection; the only run-time
/// state is the memoized package list.
pub trait Policy {
    /// Short policy name for logs and the banner.
    fn name(&self) -> &'static str;

    /// Whether this policy applies to the current host.
    fn matches_host(&self) -> bool;

    /// Capability tags valid on this host.
    fn eligible_tags(&self) -> &[CapabilityTag];

    /// Container format preference.
    fn preferred_archive_format(&self) -> ArchiveFormat {
        ArchiveFormat::Tar
    }

    /// Checksum algorithm preference. FIPS-mode hosts are pinned to
    /// SHA-256.
    fn preferred_hash(&self) -> HashAlgorithm {
        if fips_enabled() {
            HashAlgorithm::Sha256
        } else {
            HashAlgorithm::Sha512
        }
    }

    /// Whether the current user can collect privileged data.
    fn is_privileged(&self) -> bool {
        current_euid() == Some(0)
    }

    /// Installed package list, queried once and memoized.
    fn package_list(&self) -> &[String] {
        &[]
    }

    /// Look up an installed package by name.
    fn pkg_by_name(&self, name: &str) -> Option<&str> {
        self.package_list().iter().map(String::as_str).find(|line| {
            line.split_whitespace().next().map(|pkg| pkg == name).unwrap_or(false)
        })
    }

    /// A plugin is eligible if it declares itself platform-independent
    /// or its tags intersect this host's eligible set.
    fn validate_plugin(&self, tags: &[CapabilityTag]) -> bool {
        tags.contains(&CapabilityTag::Independent)
            || tags.iter().any(|tag| self.eligible_tags().contains(tag))
    }

    /// Message shown to the operator before collection begins.
    fn banner(&self) -> String {
        format!(
            "This utility will collect diagnostic and configuration \
             information from this {} system and package it in an archive.\n\
             The generated archive may contain data considered sensitive; \
             review its content before passing it on.\n",
            self.name()
        )
    }

    /// Base name of the archive, also its synthetic root directory.
    fn archive_base_name(&self, ident: &Identification) -> String {
        let mut parts = vec!["sosreport".to_string(), short_hostname()];
        if let Some(ticket) = &ident.ticket_number {
            if !ticket.is_empty() {
                parts.push(sanitize_component(ticket));
            }
        }
        parts.push(chrono::Local::now().format("%Y%m%d%H%M").to_string());
        parts.join("-")
    }

    /// Gather operator name and ticket id, prompting interactively
    /// unless running in batch mode. The only post-detection mutation a
    /// run performs on policy-owned data.
    fn collect_identification(
        &self,
        batch: bool,
        preset_name: Option<String>,
        preset_ticket: Option<String>,
    ) -> Identification {
        let operator_name = match preset_name {
            Some(name) => Some(name),
            None if batch => None,
            None => prompt("Please enter your first initial and last name: "),
        };
        let ticket_number = match preset_ticket {
            Some(ticket) => Some(ticket),
            None if batch => None,
            None => prompt("Please enter the case/ticket number: "),
        };
        Identification { operator_name, ticket_number }
    }
}

/// Fallback policy accepting only platform-independent plugins.
#[derive(Debug, Default)]
pub struct GenericPolicy;

impl Policy for GenericPolicy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn matches_host(&self) -> bool {
        true
    }

    fn eligible_tags(&self) -> &[CapabilityTag] {
        &[]
    }
}

/// Select the policy for this host.
///
/// Walks a fixed priority order and takes the first policy whose
/// `matches_host` returns true; falls back to [`GenericPolicy`]. Called
/// once per run; the result is owned by the engine.
pub fn detect() -> Box<dyn Policy> {
    detect_from(vec![Box::new(RedHatPolicy::new()), Box::new(DebianPolicy::new())])
}

/// Detection over an explicit candidate list, in priority order.
pub fn detect_from(candidates: Vec<Box<dyn Policy>>) -> Box<dyn Policy> {
    for candidate in candidates {
        if candidate.matches_host() {
            tracing::debug!(policy = candidate.name(), "platform policy selected");
            return candidate;
        }
    }
    tracing::debug!("no platform policy matched, using generic fallback");
    Box::new(GenericPolicy)
}

/// Effective uid of this process, from /proc on Linux.
fn current_euid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let uid_line = status.lines().find(|line| line.starts_with("Uid:"))?;
    // Uid: real effective saved filesystem
    uid_line.split_whitespace().nth(2)?.parse().ok()
}

fn fips_enabled() -> bool {
    std::fs::read_to_string("/proc/sys/crypto/fips_enabled")
        .map(|content| content.trim() == "1")
        .unwrap_or(false)
}

fn short_hostname() -> String {
    let raw = std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string());
    let short = raw.split('.').next().unwrap_or("localhost");
    sanitize_component(short)
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Whether a marker file exists; detection probe for concrete policies.
pub(crate) fn marker_exists(path: &str) -> bool {
    Path::new(path).exists()
}

fn prompt(message: &str) -> Option<String> {
    print!("{message}");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ProbePolicy {
        matches: bool,
        probes: Arc<AtomicUsize>,
    }

    impl Policy for ProbePolicy {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn matches_host(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.matches
        }

        fn eligible_tags(&self) -> &[CapabilityTag] {
            &[CapabilityTag::RedHat]
        }
    }

    #[test]
    fn test_detection_takes_first_match() {
        let probes = Arc::new(AtomicUsize::new(0));
        let selected = detect_from(vec![
            Box::new(ProbePolicy { matches: false, probes: Arc::clone(&probes) }),
            Box::new(ProbePolicy { matches: true, probes: Arc::clone(&probes) }),
            Box::new(ProbePolicy { matches: true, probes: Arc::clone(&probes) }),
        ]);
        assert_eq!(selected.name(), "probe");
        // Third candidate never probed once a match is found.
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_generic_fallback_when_nothing_matches() {
        let probes = Arc::new(AtomicUsize::new(0));
        let selected =
            detect_from(vec![Box::new(ProbePolicy { matches: false, probes })]);
        assert_eq!(selected.name(), "generic");
    }

    #[test]
    fn test_generic_accepts_only_independent_plugins() {
        let policy = GenericPolicy;
        assert!(policy.validate_plugin(&[CapabilityTag::Independent]));
        assert!(policy.validate_plugin(&[CapabilityTag::RedHat, CapabilityTag::Independent]));
        assert!(!policy.validate_plugin(&[CapabilityTag::RedHat]));
        assert!(!policy.validate_plugin(&[]));
    }

    #[test]
    fn test_tag_intersection() {
        let probes = Arc::new(AtomicUsize::new(0));
        let policy = ProbePolicy { matches: true, probes };
        assert!(policy.validate_plugin(&[CapabilityTag::RedHat]));
        assert!(!policy.validate_plugin(&[CapabilityTag::Debian]));
    }

    #[test]
    fn test_archive_base_name_shape() {
        let policy = GenericPolicy;
        let ident = Identification {
            operator_name: None,
            ticket_number: Some("case 1234/a".to_string()),
        };
        let name = policy.archive_base_name(&ident);
        assert!(name.starts_with("sosreport-"));
        assert!(name.contains("case_1234_a"));
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
    }

    #[test]
    fn test_batch_identification_skips_prompts() {
        let policy = GenericPolicy;
        let ident = policy.collect_identification(true, None, Some("42".to_string()));
        assert_eq!(ident.operator_name, None);
        assert_eq!(ident.ticket_number.as_deref(), Some("42"));
    }

    #[test]
    fn test_pkg_by_name_matches_first_field() {
        struct Pkgs(Vec<String>);
        impl Policy for Pkgs {
            fn name(&self) -> &'static str {
                "pkgs"
            }
            fn matches_host(&self) -> bool {
                true
            }
            fn eligible_tags(&self) -> &[CapabilityTag] {
                &[]
            }
            fn package_list(&self) -> &[String] {
                &self.0
            }
        }

        let policy = Pkgs(vec!["openssh 9.6".to_string(), "openssl 3.2".to_string()]);
        assert!(policy.pkg_by_name("openssh").is_some());
        assert!(policy.pkg_by_name("openss").is_none());
    }
}
