//! System log collection with size limits.

use crate::plugin::{OptionValue, Plugin, PluginContext, PluginDeclaration};
use crate::policy::CapabilityTag;

pub struct Logs;

impl Plugin for Logs {
    fn declaration(&self) -> PluginDeclaration {
        PluginDeclaration::new("logs", "system log files")
            .version("1.0")
            .tag(CapabilityTag::Independent)
            .trigger_file("/var/log")
            .option(
                "size_limit",
                "cumulative size limit per log pattern, in MiB",
                OptionValue::Int(25),
            )
            .option("all_logs", "collect rotated logs as well", OptionValue::Bool(false))
    }

    fn setup(&self, ctx: &mut PluginContext<'_>) -> anyhow::Result<()> {
        let limit = ctx.option_int("size_limit", 25).max(0) as u64;

        ctx.add_copy_spec("/etc/syslog.conf");
        ctx.add_copy_spec("/etc/rsyslog.conf");
        ctx.add_copy_spec_limit("/var/log/messages", limit);
        ctx.add_copy_spec_limit("/var/log/syslog", limit);
        ctx.add_copy_spec_limit("/var/log/dmesg", limit);

        if ctx.option_enabled("all_logs") {
            ctx.add_copy_spec_limit("/var/log/messages.*", limit);
            ctx.add_copy_spec_limit("/var/log/syslog.*", limit);
        }

        // Never pick up journal credentials however the globs expand.
        ctx.add_forbidden_path("/var/log/journal/*/fss");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration() {
        let decl = Logs.declaration();
        assert!(decl.requires_root);
        assert_eq!(decl.options.len(), 2);
        assert_eq!(decl.options[0].default, OptionValue::Int(25));
    }
}
