//! Network configuration and state, for the Linux families.

use std::path::Path;

use crate::plugin::{Plugin, PluginContext, PluginDeclaration, QueuedCommand};
use crate::policy::CapabilityTag;

pub struct Networking;

impl Plugin for Networking {
    fn declaration(&self) -> PluginDeclaration {
        PluginDeclaration::new("networking", "network interfaces, routing and resolver state")
            .version("1.0")
            .requires_root(false)
            .tag(CapabilityTag::RedHat)
            .tag(CapabilityTag::Debian)
            .tag(CapabilityTag::Ubuntu)
            .trigger_file("/etc/resolv.conf")
    }

    fn setup(&self, ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        ctx.add_copy_specs(&["/etc/resolv.conf", "/etc/hosts", "/etc/nsswitch.conf"]);

        ctx.collect(QueuedCommand::new("ip addr").root_symlink("ip_addr"));
        ctx.collect_output("ip route");
        ctx.collect_output("ip -s link");
        Ok(())
    }

    fn postproc(&self, ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        // Shared-secret style options occasionally end up in resolv.conf
        // on hosts using DNS update keys.
        ctx.regex_sub(Path::new("/etc/resolv.conf"), r"(?m)^(\s*key\s+)\S+", "${1}********");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration() {
        let decl = Networking.declaration();
        assert_eq!(decl.tags.len(), 3);
        assert!(!decl.tags.contains(&CapabilityTag::Independent));
        assert_eq!(decl.trigger_files, vec!["/etc/resolv.conf".to_string()]);
    }
}
