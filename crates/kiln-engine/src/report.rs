//! Section reports and perf-map emission.

use crate::memory::{AsanGlobalsBracket, SectionKind, SectionLog, SectionRecord};
use kiln_base::Result;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Snapshot of the sections the memory manager observed.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub module: String,
    pub sections: Vec<SectionRecord>,
    pub asan_globals: Option<AsanGlobalsBracket>,
    pub finalized: bool,
}

impl SectionReport {
    pub(crate) fn from_log(log: &SectionLog, module: &str) -> Self {
        Self {
            module: module.to_string(),
            sections: log.records.clone(),
            asan_globals: log.asan_globals,
            finalized: log.finalized,
        }
    }

    /// Iterates over the code sections only.
    pub fn code_sections(&self) -> impl Iterator<Item = &SectionRecord> {
        self.sections
            .iter()
            .filter(|r| r.kind == SectionKind::Code)
    }
}

/// Writes perf-map lines for the code sections to the given file.
///
/// Format per line: `START SIZE symbol`, the convention perf uses to
/// symbolize JIT'd code.
pub fn write_perf_map_to(report: &SectionReport, path: &Path) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    for record in report.code_sections() {
        writeln!(
            file,
            "{:x} {:x} jit:{}:{}",
            record.address, record.size, report.module, record.name
        )?;
    }
    Ok(())
}

/// Writes the standard `perf-<pid>.map` file and returns its path.
pub fn write_perf_map(report: &SectionReport) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("perf-{}.map", std::process::id()));
    write_perf_map_to(report, &path)?;
    tracing::info!(path = %path.display(), "wrote perf map");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> SectionReport {
        SectionReport {
            module: "pi".to_string(),
            sections: vec![
                SectionRecord {
                    kind: SectionKind::Code,
                    address: 0x7f00_0000,
                    size: 0x40,
                    alignment: 16,
                    section_id: 1,
                    name: ".text".to_string(),
                    read_only: false,
                },
                SectionRecord {
                    kind: SectionKind::Data,
                    address: 0x7f10_0000,
                    size: 0x20,
                    alignment: 8,
                    section_id: 2,
                    name: ".rodata".to_string(),
                    read_only: true,
                },
            ],
            asan_globals: None,
            finalized: true,
        }
    }

    #[test]
    fn test_perf_map_lines_cover_code_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("perf.map");
        write_perf_map_to(&sample_report(), &path).expect("write should succeed");

        let text = std::fs::read_to_string(&path).expect("read map");
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text.lines().next().unwrap(), "7f000000 40 jit:pi:.text");
    }

    #[test]
    fn test_report_serializes() {
        let json = serde_json::to_string(&sample_report()).expect("serialize");
        assert!(json.contains("\".text\""));
        assert!(json.contains("\"code\""));
        assert!(json.contains("\"read_only\":true"));
    }
}
