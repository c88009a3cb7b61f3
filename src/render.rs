use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::convert::{ConvertOutcome, DocumentConverter, TargetFormat};
use crate::docx::package::DocxPackage;
use crate::docx::repair::{repair_and_substitute, RepairReport};
use crate::docx::substitute::FieldMap;
use crate::templates::{TemplateCatalog, TemplateEntry, TemplateKind};

pub const FINAL_DOCX: &str = "offer_final.docx";
pub const FINAL_PDF: &str = "offer_final.pdf";
pub const PREVIEW_JPG: &str = "previews/preview_page1.jpg";

#[derive(Clone, Debug)]
pub struct GeneratedOffer {
    pub docx: PathBuf,
    /// `None` when the converter was unavailable.
    pub pdf: Option<PathBuf>,
    pub preview: Option<PathBuf>,
    pub reports: Vec<(String, RepairReport)>,
}

pub struct OfferRenderer<C: DocumentConverter> {
    catalog: TemplateCatalog,
    products_root: PathBuf,
    converter: C,
}

impl<C: DocumentConverter> OfferRenderer<C> {
    pub fn new(catalog: TemplateCatalog, products_root: impl Into<PathBuf>, converter: C) -> Self {
        Self {
            catalog,
            products_root: products_root.into(),
            converter,
        }
    }

    pub fn catalog_mut(&mut self) -> &mut TemplateCatalog {
        &mut self.catalog
    }

    /// Fills the template with `data`, then produces the PDF and a first-page preview.
    pub fn generate(
        &mut self,
        template_id: &str,
        data: &FieldMap,
        products: &[String],
        out_dir: &Path,
    ) -> anyhow::Result<GeneratedOffer> {
        let entry = self.catalog.template(template_id)?;
        let template_dir = self.catalog.template_dir(&entry);
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("create offer dir: {}", out_dir.display()))?;
        let docx = out_dir.join(FINAL_DOCX);

        let reports = match entry.kind {
            TemplateKind::SingleFile => {
                let main = main_file(&entry, &template_dir)?;
                let report = fill_to(&main, &docx, data)?;
                vec![(file_label(&main), report)]
            }
            TemplateKind::MultiFile => {
                self.generate_multi(&entry, &template_dir, data, products, out_dir, &docx)?
            }
        };
        log::info!("generated {}", docx.display());

        let pdf = self.convert(&docx, TargetFormat::Pdf, &out_dir.join(FINAL_PDF))?;
        let preview = match pdf.as_deref() {
            Some(pdf) => self.convert(pdf, TargetFormat::Jpeg, &out_dir.join(PREVIEW_JPG))?,
            None => None,
        };

        Ok(GeneratedOffer {
            docx,
            pdf,
            preview,
            reports,
        })
    }

    fn generate_multi(
        &self,
        entry: &TemplateEntry,
        template_dir: &Path,
        data: &FieldMap,
        products: &[String],
        out_dir: &Path,
        docx: &Path,
    ) -> anyhow::Result<Vec<(String, RepairReport)>> {
        if entry.files.is_empty() {
            return Err(anyhow!("multi_file template {} lists no files", entry.id));
        }

        let mut reports = Vec::with_capacity(entry.files.len());
        let mut filled = TempFiles::default();
        for file in &entry.files {
            let src = template_dir.join(&file.file);
            let tmp = out_dir.join(format!("temp_{}", file.file));
            filled.0.push(tmp.clone());
            reports.push((file.file.clone(), fill_to(&src, &tmp, data)?));
        }

        let mut sources = filled.0.clone();
        if let Some(point) = entry.injection_point.as_ref() {
            let product_files = self.product_files(products);
            if !product_files.is_empty() {
                let at = entry
                    .files
                    .iter()
                    .position(|f| f.file == point.before)
                    .unwrap_or(sources.len());
                let tail = sources.split_off(at);
                sources.extend(product_files);
                sources.extend(tail);
            }
        }

        if sources.len() == 1 {
            std::fs::copy(&sources[0], docx)
                .with_context(|| format!("copy {} -> {}", sources[0].display(), docx.display()))?;
            return Ok(reports);
        }
        match self.converter.merge(&sources, docx)? {
            ConvertOutcome::Converted(_) => Ok(reports),
            ConvertOutcome::Unavailable(reason) => Err(anyhow!(
                "merging {} documents unavailable: {reason}",
                sources.len()
            )),
        }
    }

    fn product_files(&self, products: &[String]) -> Vec<PathBuf> {
        products
            .iter()
            .filter_map(|id| {
                let p = self.products_root.join(format!("{id}.docx"));
                if p.is_file() {
                    Some(p)
                } else {
                    log::warn!("product not found, skipped: {}", p.display());
                    None
                }
            })
            .collect()
    }

    fn convert(
        &self,
        source: &Path,
        format: TargetFormat,
        output: &Path,
    ) -> anyhow::Result<Option<PathBuf>> {
        match self.converter.convert(source, format, output)? {
            ConvertOutcome::Converted(p) => Ok(Some(p)),
            ConvertOutcome::Unavailable(reason) => {
                log::warn!("{:?} conversion unavailable: {reason}", format);
                Ok(None)
            }
        }
    }
}

/// Intermediate files of a multi-file offer, removed on every exit path.
#[derive(Default)]
struct TempFiles(Vec<PathBuf>);

impl Drop for TempFiles {
    fn drop(&mut self) {
        for tmp in &self.0 {
            if tmp.exists() {
                let _ = std::fs::remove_file(tmp);
            }
        }
    }
}

/// Checked in order when a template names no `main_file`.
const DEFAULT_MAIN_FILES: [&str; 3] = ["oferta1.docx", "wolftax.docx", "Dok1.docx"];

/// `main_file`, a well-known default name, or the first `.docx` in the template folder.
fn main_file(entry: &TemplateEntry, template_dir: &Path) -> anyhow::Result<PathBuf> {
    if let Some(main) = entry.main_file.as_deref() {
        return Ok(template_dir.join(main));
    }
    if let Some(known) = DEFAULT_MAIN_FILES
        .iter()
        .map(|name| template_dir.join(name))
        .find(|p| p.is_file())
    {
        return Ok(known);
    }
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(template_dir)
        .with_context(|| format!("list template dir: {}", template_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_template_docx(p))
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no DOCX files in template: {}", template_dir.display()))
}

/// Skips Word lock files (`~$...`) and outputs of the fix command.
pub fn is_template_docx(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.to_ascii_lowercase().ends_with(".docx")
        && !name.starts_with("~$")
        && !name.contains("_FIXED")
}

fn fill_to(src: &Path, dst: &Path, data: &FieldMap) -> anyhow::Result<RepairReport> {
    let mut pkg = DocxPackage::read(src)?;
    let report = repair_and_substitute(&mut pkg, data);
    pkg.write(dst)?;
    Ok(report)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
