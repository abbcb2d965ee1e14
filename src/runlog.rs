use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn tag(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

/// Per-run migration log. Every batch run appends to its own file under
/// logs/ in the workspace; each line is also forwarded to the process log.
pub struct RunLog {
    domain: &'static str,
    path: PathBuf,
    file: File,
}

impl RunLog {
    pub fn new(workspace: &Path, domain: &'static str) -> anyhow::Result<Self> {
        let dir = workspace.join("logs");
        std::fs::create_dir_all(&dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_migration_{}.log", domain, stamp));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(RunLog { domain, path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn message(&mut self, severity: Severity, msg: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(self.file, "{} [{}] {}", stamp, severity.tag(), msg);
        match severity {
            Severity::Info => log::info!(target: "migration", "[{}] {}", self.domain, msg),
            Severity::Warning => log::warn!(target: "migration", "[{}] {}", self.domain, msg),
            Severity::Error => log::error!(target: "migration", "[{}] {}", self.domain, msg),
        }
    }

    pub fn info(&mut self, msg: impl AsRef<str>) {
        self.message(Severity::Info, msg.as_ref());
    }

    pub fn warning(&mut self, msg: impl AsRef<str>) {
        self.message(Severity::Warning, msg.as_ref());
    }

    pub fn error(&mut self, msg: impl AsRef<str>) {
        self.message(Severity::Error, msg.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_writes_severity_tagged_lines() {
        let dir = std::env::temp_dir().join(format!(
            "nbrmigrated-runlog-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create temp dir");

        let mut log = RunLog::new(&dir, "communication").expect("open run log");
        log.error("No contact found with participant_id: P1");
        log.warning("defaulted status");

        let text = std::fs::read_to_string(log.path()).expect("read log file");
        assert!(text.contains("[ERROR] No contact found with participant_id: P1"));
        assert!(text.contains("[WARNING] defaulted status"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
