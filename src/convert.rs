//! Document conversion through external tools.
//!
//! The renderer only talks to [`DocumentConverter`]; [`ExternalTools`] is the
//! production implementation that shells out to `unoconvert`, `pdftoppm` and
//! `pdftk`. Any tool failure is reported as [`ConvertOutcome::Unavailable`].

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::config::ToolSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetFormat {
    Pdf,
    /// First page only.
    Jpeg,
    Docx,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg => "jpg",
            Self::Docx => "docx",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvertOutcome {
    Converted(PathBuf),
    Unavailable(String),
}

impl ConvertOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Converted(p) => Some(p),
            Self::Unavailable(_) => None,
        }
    }
}

pub trait DocumentConverter {
    fn convert(
        &self,
        source: &Path,
        format: TargetFormat,
        output: &Path,
    ) -> anyhow::Result<ConvertOutcome>;

    /// Concatenates `sources` in order into one DOCX at `output`.
    fn merge(&self, sources: &[PathBuf], output: &Path) -> anyhow::Result<ConvertOutcome>;
}

pub struct ExternalTools {
    settings: ToolSettings,
}

#[derive(Clone, Debug)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    pub detail: String,
}

impl ExternalTools {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }

    /// Asks every configured tool for its version.
    pub fn probe(&self) -> Vec<ToolStatus> {
        let s = &self.settings;
        [
            (&s.unoconvert, "--version"),
            (&s.pdftoppm, "-v"),
            (&s.pdftk, "--version"),
        ]
        .into_iter()
        .map(|(bin, flag)| {
            let mut cmd = Command::new(bin);
            cmd.arg(flag);
            let (available, detail) = match run_with_timeout(cmd, Duration::from_secs(5)) {
                Ok(out) => (true, out.lines().next().unwrap_or("").trim().to_string()),
                Err(reason) => (false, reason),
            };
            ToolStatus {
                name: bin.clone(),
                available,
                detail,
            }
        })
        .collect()
    }

    fn unoconvert(&self, source: &Path, output: &Path, format: TargetFormat) -> ConvertOutcome {
        let mut cmd = Command::new(&self.settings.unoconvert);
        cmd.arg("--convert-to")
            .arg(format.extension())
            .arg(source)
            .arg(output);
        self.finish(cmd, self.settings.convert_timeout, output)
    }

    fn preview(&self, pdf: &Path, output: &Path) -> ConvertOutcome {
        // pdftoppm appends the extension itself.
        let stem = output.with_extension("");
        let mut cmd = Command::new(&self.settings.pdftoppm);
        cmd.args(["-jpeg", "-f", "1", "-singlefile", "-scale-to"])
            .arg(self.settings.preview_scale.to_string())
            .arg(pdf)
            .arg(&stem);
        self.finish(cmd, self.settings.preview_timeout, output)
    }

    fn finish(&self, cmd: Command, timeout: Duration, output: &Path) -> ConvertOutcome {
        let program = cmd.get_program().to_string_lossy().into_owned();
        match run_with_timeout(cmd, timeout) {
            Ok(_) if output.exists() => ConvertOutcome::Converted(output.to_path_buf()),
            Ok(_) => ConvertOutcome::Unavailable(format!(
                "{program} produced no output at {}",
                output.display()
            )),
            Err(reason) => {
                log::warn!("{program} failed: {reason}");
                ConvertOutcome::Unavailable(reason)
            }
        }
    }
}

impl DocumentConverter for ExternalTools {
    fn convert(
        &self,
        source: &Path,
        format: TargetFormat,
        output: &Path,
    ) -> anyhow::Result<ConvertOutcome> {
        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create output dir: {}", dir.display()))?;
        }
        let is_pdf = source
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        Ok(match format {
            TargetFormat::Jpeg if is_pdf => self.preview(source, output),
            TargetFormat::Jpeg => {
                let pdf = output.with_extension("preview.pdf");
                let outcome = match self.unoconvert(source, &pdf, TargetFormat::Pdf) {
                    ConvertOutcome::Converted(pdf) => self.preview(&pdf, output),
                    other => other,
                };
                let _ = std::fs::remove_file(&pdf);
                outcome
            }
            TargetFormat::Pdf | TargetFormat::Docx => self.unoconvert(source, output, format),
        })
    }

    /// Each source goes to PDF, the PDFs are concatenated with pdftk and the
    /// result is converted back to DOCX.
    fn merge(&self, sources: &[PathBuf], output: &Path) -> anyhow::Result<ConvertOutcome> {
        if sources.is_empty() {
            return Ok(ConvertOutcome::Unavailable("nothing to merge".to_string()));
        }
        let mut parts: Vec<PathBuf> = Vec::with_capacity(sources.len());
        let mut outcome = None;
        for (i, src) in sources.iter().enumerate() {
            let pdf = output.with_file_name(format!("merge_part{i}.pdf"));
            match self.unoconvert(src, &pdf, TargetFormat::Pdf) {
                ConvertOutcome::Converted(p) => parts.push(p),
                other => {
                    outcome = Some(other);
                    break;
                }
            }
        }

        let merged_pdf = output.with_extension("merged.pdf");
        let outcome = match outcome {
            Some(failed) => failed,
            None => {
                let mut cmd = Command::new(&self.settings.pdftk);
                cmd.args(&parts).arg("cat").arg("output").arg(&merged_pdf);
                match self.finish(cmd, self.settings.merge_timeout, &merged_pdf) {
                    ConvertOutcome::Converted(pdf) => {
                        self.unoconvert(&pdf, output, TargetFormat::Docx)
                    }
                    other => other,
                }
            }
        };

        for p in parts.iter().chain(std::iter::once(&merged_pdf)) {
            let _ = std::fs::remove_file(p);
        }
        Ok(outcome)
    }
}

/// Runs `cmd` to completion, killing it after `timeout`. Returns stdout on success.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<String, String> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("cannot start {program}: {e}"))?;

    let t0 = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if t0.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("{program} timed out after {}s", timeout.as_secs()));
            }
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => return Err(format!("wait for {program}: {e}")),
        }
    };

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    if status.success() {
        return Ok(stdout);
    }
    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }
    Err(format!("{program} exited with {status}: {}", stderr.trim()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{ConvertOutcome, DocumentConverter, ExternalTools, TargetFormat};
    use crate::config::ToolSettings;

    fn missing_tools() -> ExternalTools {
        ExternalTools::new(ToolSettings {
            unoconvert: "offer-renderer-no-such-unoconvert".to_string(),
            pdftoppm: "offer-renderer-no-such-pdftoppm".to_string(),
            pdftk: "offer-renderer-no-such-pdftk".to_string(),
            convert_timeout: Duration::from_secs(1),
            ..ToolSettings::default()
        })
    }

    #[test]
    fn missing_binary_is_reported_as_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("in.docx");
        std::fs::write(&src, b"x").expect("write");
        let outcome = missing_tools()
            .convert(&src, TargetFormat::Pdf, &dir.path().join("out.pdf"))
            .expect("convert never errors on tool failure");
        match outcome {
            ConvertOutcome::Unavailable(reason) => assert!(reason.contains("cannot start")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn merge_without_tools_is_unavailable_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("merged.docx");
        let outcome = missing_tools()
            .merge(&[PathBuf::from("a.docx"), PathBuf::from("b.docx")], &out)
            .expect("merge");
        assert!(outcome.path().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn probe_lists_every_tool() {
        let status = missing_tools().probe();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| !s.available));
    }
}
