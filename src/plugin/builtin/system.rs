//! Basic host information, valid on any platform.

use crate::plugin::{Plugin, PluginContext, PluginDeclaration, QueuedCommand};
use crate::policy::CapabilityTag;

pub struct System;

impl Plugin for System {
    fn declaration(&self) -> PluginDeclaration {
        PluginDeclaration::new("system", "basic host configuration and kernel information")
            .version("1.0")
            .requires_root(false)
            .tag(CapabilityTag::Independent)
    }

    fn setup(&self, ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        ctx.add_copy_specs(&["/etc/os-release", "/etc/hostname", "/etc/issue"]);
        // World-readable but worthless to support and unique per host.
        ctx.add_forbidden_path("/etc/machine-id");

        ctx.collect(QueuedCommand::new("uname -a").root_symlink("uname"));
        ctx.collect_output("date");
        ctx.collect_output("uptime");
        ctx.collect_output("df -h");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration() {
        let decl = System.declaration();
        assert_eq!(decl.name, "system");
        assert!(!decl.requires_root);
        assert!(decl.tags.contains(&CapabilityTag::Independent));
    }
}
