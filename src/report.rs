//! Typed report tree and its plain-text rendering.
//!
//! A [`Report`] holds only [`Section`]s and a section holds only typed
//! [`SectionEntry`] leaves; the shape is enforced by the types rather
//! than by convention.

/// One leaf of a report section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionEntry {
    /// An executed command and where its output landed.
    Command { cmdline: String, href: Option<String> },
    /// A file copied from the host.
    CopiedFile { name: String, href: String },
    /// A file created from collected strings.
    CreatedFile { name: String },
    /// An alert raised by the plugin.
    Alert(String),
    /// Free-form narrative text.
    Note(String),
}

/// All entries gathered for one plugin.
#[derive(Debug, Default)]
pub struct Section {
    name: String,
    entries: Vec<SectionEntry>,
}

impl Section {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), entries: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&mut self, entry: SectionEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SectionEntry] {
        &self.entries
    }
}

/// The full report: an ordered list of sections.
#[derive(Debug, Default)]
pub struct Report {
    sections: Vec<Section>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }
}

/// Plain-text renderer for a [`Report`].
pub struct PlainTextReport<'a>(pub &'a Report);

impl std::fmt::Display for PlainTextReport<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for section in self.0.sections() {
            writeln!(f, "{}", section.name())?;
            writeln!(f, "{}", "-".repeat(section.name().len()))?;

            let mut write_group = |title: &str, lines: Vec<String>| -> std::fmt::Result {
                if lines.is_empty() {
                    return Ok(());
                }
                writeln!(f, "  {title}:")?;
                for line in lines {
                    writeln!(f, "    {line}")?;
                }
                Ok(())
            };

            write_group(
                "commands executed",
                section
                    .entries()
                    .iter()
                    .filter_map(|e| match e {
                        SectionEntry::Command { cmdline, href: Some(href) } => {
                            Some(format!("{cmdline} -> {href}"))
                        }
                        SectionEntry::Command { cmdline, href: None } => Some(cmdline.clone()),
                        _ => None,
                    })
                    .collect(),
            )?;
            write_group(
                "files copied",
                section
                    .entries()
                    .iter()
                    .filter_map(|e| match e {
                        SectionEntry::CopiedFile { name, href } => {
                            Some(format!("{name} -> {href}"))
                        }
                        _ => None,
                    })
                    .collect(),
            )?;
            write_group(
                "files created",
                section
                    .entries()
                    .iter()
                    .filter_map(|e| match e {
                        SectionEntry::CreatedFile { name } => Some(name.clone()),
                        _ => None,
                    })
                    .collect(),
            )?;
            write_group(
                "alerts",
                section
                    .entries()
                    .iter()
                    .filter_map(|e| match e {
                        SectionEntry::Alert(text) => Some(text.clone()),
                        _ => None,
                    })
                    .collect(),
            )?;
            write_group(
                "notes",
                section
                    .entries()
                    .iter()
                    .filter_map(|e| match e {
                        SectionEntry::Note(text) => Some(text.clone()),
                        _ => None,
                    })
                    .collect(),
            )?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_structure() {
        let mut report = Report::new();
        let mut section = Section::new("networking");
        section.add(SectionEntry::Command {
            cmdline: "ip addr".to_string(),
            href: Some("sos_commands/networking/ip_addr".to_string()),
        });
        section.add(SectionEntry::CopiedFile {
            name: "/etc/hosts".to_string(),
            href: "etc/hosts".to_string(),
        });
        section.add(SectionEntry::Alert("resolver misconfigured".to_string()));
        report.add(section);

        assert_eq!(report.sections().len(), 1);
        assert_eq!(report.sections()[0].entries().len(), 3);
    }

    #[test]
    fn test_plain_text_rendering() {
        let mut report = Report::new();
        let mut section = Section::new("system");
        section.add(SectionEntry::Command {
            cmdline: "uname -a".to_string(),
            href: Some("sos_commands/system/uname_-a".to_string()),
        });
        section.add(SectionEntry::CreatedFile { name: "summary.txt".to_string() });
        section.add(SectionEntry::Note("collected on a test host".to_string()));
        report.add(section);

        let text = PlainTextReport(&report).to_string();
        assert!(text.contains("system\n------"));
        assert!(text.contains("uname -a -> sos_commands/system/uname_-a"));
        assert!(text.contains("files created:"));
        assert!(text.contains("collected on a test host"));
    }

    #[test]
    fn test_empty_groups_omitted() {
        let mut report = Report::new();
        report.add(Section::new("quiet"));
        let text = PlainTextReport(&report).to_string();
        assert!(text.contains("quiet"));
        assert!(!text.contains("alerts:"));
        assert!(!text.contains("commands executed:"));
    }
}
