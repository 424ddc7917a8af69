//! Wrapper shell scripts carrying `#$` directives.

use crate::encoder::Directive;
use crate::error::GridResult;
use chrono::NaiveDateTime;
use std::io::Write;
use tempfile::NamedTempFile;

/// Prefix Grid Engine recognises for embedded qsub options.
pub const DIRECTIVE_PREFIX: &str = "#$";

/// Provenance recorded at the top of every wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptHeader {
    /// (name, version) of the submitting tool and of this plugin
    pub built_by: [(String, String); 2],
    pub command_line: String,
    pub submitted: NaiveDateTime,
}

impl ScriptHeader {
    fn lines(&self) -> Vec<String> {
        let [(tool, tool_ver), (plugin, plugin_ver)] = &self.built_by;
        vec![
            format!(
                "# Built by {} v.{} and {} v.{}",
                tool, tool_ver, plugin, plugin_ver
            ),
            format!("# Command line: {}", self.command_line),
            format!(
                "# Submission time (H:M:S DD/MM/YYYY): {}",
                self.submitted.format("%H:%M:%S %d/%m/%Y")
            ),
            String::new(),
        ]
    }
}

/// Contents of a job wrapper script.
#[derive(Debug, Clone, PartialEq)]
pub struct JobScript<'a> {
    pub shell: &'a str,
    pub directives: &'a [Directive],
    pub module_paths: &'a [String],
    pub modules: &'a [String],
    pub header: ScriptHeader,
    pub extra_lines: &'a [String],
    pub command: &'a [String],
}

impl JobScript<'_> {
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("#!{}", self.shell), String::new()];

        lines.extend(
            self.directives
                .iter()
                .map(|d| format!("{} {}", DIRECTIVE_PREFIX, d.join(" "))),
        );

        if !self.module_paths.is_empty() {
            lines.push(format!(
                "MODULEPATH={}:$MODULEPATH",
                self.module_paths.join(":")
            ));
        }
        lines.extend(self.modules.iter().map(|m| format!("module load {}", m)));

        lines.extend(self.header.lines());
        lines.extend(self.extra_lines.iter().cloned());
        lines.push(self.command.join(" "));
        lines.push(String::new());
        lines
    }

    pub fn render(&self) -> String {
        let mut text = self.lines().join("\n");
        text.push('\n');
        text
    }

    /// Write the script to an executable temporary file.
    ///
    /// The file is deleted when the returned handle is dropped.
    pub fn write_temp(&self) -> GridResult<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("gridsub_")
            .suffix(".sh")
            .tempfile()?;
        file.write_all(self.render().as_bytes())?;
        file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(file)
    }
}
