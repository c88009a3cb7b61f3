use std::path::Path;

use anyhow::Context;

use crate::docx::normalize::{contains_delimiter, normalize};
use crate::docx::package::DocxPackage;
use crate::docx::substitute::{substitute, FieldMap};

/// Members that may carry placeholders.
pub const TEMPLATE_PARTS: [&str; 5] = [
    "word/document.xml",
    "word/header1.xml",
    "word/header2.xml",
    "word/footer1.xml",
    "word/footer2.xml",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Members whose text changed.
    pub touched: Vec<String>,
    /// Members present in the archive but not decodable as text.
    pub skipped: Vec<(String, String)>,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        !self.touched.is_empty()
    }
}

/// Normalizes and fills every template member present in `pkg`.
///
/// Absent members are not an error, and a member that cannot be decoded is
/// recorded in the report without stopping the others.
pub fn repair_and_substitute(pkg: &mut DocxPackage, data: &FieldMap) -> RepairReport {
    rewrite_parts(pkg, |_, xml| Some(substitute(&normalize(xml), data)))
}

/// Run merging only, limited to members that contain a delimiter.
pub fn repair_tags(pkg: &mut DocxPackage) -> RepairReport {
    rewrite_parts(pkg, |name, xml| {
        if !contains_delimiter(xml) {
            return None;
        }
        log::info!("placeholders found in {name}");
        Some(normalize(xml))
    })
}

/// Decodes a DOCX, fills it and serializes it again.
///
/// A corrupt archive surfaces as [`crate::error::DocxError::CorruptArchive`].
pub fn fill_docx_bytes(template: &[u8], data: &FieldMap) -> anyhow::Result<Vec<u8>> {
    let mut pkg = DocxPackage::from_bytes(template)?;
    let report = repair_and_substitute(&mut pkg, data);
    log::debug!(
        "filled {} part(s), skipped {}",
        report.touched.len(),
        report.skipped.len()
    );
    pkg.to_bytes().context("serialize filled docx")
}

pub fn fill_docx_file(input: &Path, output: &Path, data: &FieldMap) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(input).with_context(|| format!("read template: {}", input.display()))?;
    let filled =
        fill_docx_bytes(&bytes, data).with_context(|| format!("fill: {}", input.display()))?;
    std::fs::write(output, filled).with_context(|| format!("write docx: {}", output.display()))?;
    Ok(())
}

fn rewrite_parts<F>(pkg: &mut DocxPackage, mut rewrite: F) -> RepairReport
where
    F: FnMut(&str, &str) -> Option<String>,
{
    let mut report = RepairReport::default();
    for name in TEMPLATE_PARTS {
        let xml = match pkg.part_text(name) {
            Ok(Some(xml)) => xml,
            Ok(None) => continue,
            Err(err) => {
                log::warn!("skipping {name}: {err}");
                report.skipped.push((name.to_string(), err.to_string()));
                continue;
            }
        };
        if let Some(updated) = rewrite(name, &xml).filter(|u| *u != xml) {
            log::debug!("rewrote {name} ({} -> {} bytes)", xml.len(), updated.len());
            pkg.set_part_text(name, &updated);
            report.touched.push(name.to_string());
        }
    }
    report
}
