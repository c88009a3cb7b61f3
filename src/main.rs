use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use walkdir::WalkDir;

use offer_renderer::config::{init_default_config, Settings};
use offer_renderer::convert::ExternalTools;
use offer_renderer::docx::analyze::{analyze_package, placeholder_names};
use offer_renderer::docx::package::DocxPackage;
use offer_renderer::docx::repair::{fill_docx_file, repair_tags};
use offer_renderer::docx::substitute::FieldMap;
use offer_renderer::progress::ConsoleProgress;
use offer_renderer::render::{is_template_docx, OfferRenderer};
use offer_renderer::templates::TemplateCatalog;

#[derive(Parser, Debug)]
#[command(name = "offer-renderer")]
#[command(about = "Fills DOCX offer templates and renders them to PDF", long_about = None)]
struct Args {
    /// Config file path (default: $OFFER_RENDERER_CONFIG or offer-renderer.toml upwards)
    #[arg(long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge placeholders split across runs
    Fix {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        /// Output .docx (default: <input_stem>_FIXED.docx)
        #[arg(short, long, value_name = "DOCX")]
        output: Option<PathBuf>,
    },
    /// Run `fix` on every template under DIR
    FixAll {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
    /// Report delimiter balance and split placeholders
    Analyze {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        /// Write word/document.xml as text to PATH
        #[arg(long, value_name = "PATH")]
        dump_xml: Option<PathBuf>,
    },
    /// Fill one DOCX with values from a JSON object
    Fill {
        #[arg(value_name = "DOCX")]
        input: PathBuf,
        /// JSON file with the field values
        #[arg(long, value_name = "JSON")]
        data: PathBuf,
        #[arg(short, long, value_name = "DOCX")]
        output: PathBuf,
    },
    /// List the template catalog
    Templates,
    /// Generate an offer (DOCX, PDF, preview) from a catalog template
    Render {
        #[arg(long, value_name = "ID")]
        template: String,
        #[arg(long, value_name = "JSON")]
        data: PathBuf,
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
        /// Product document id (repeatable)
        #[arg(long = "product", value_name = "ID")]
        products: Vec<String>,
    },
    /// Show which conversion tools are installed
    CheckTools,
    /// Write a default config file, then exit
    InitConfig {
        /// Directory to write the config into (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Fix { input, output } => {
            let output = output.unwrap_or_else(|| fixed_output_for(&input));
            if !fix_one(&input, &output)? {
                eprintln!("Nothing to fix: {}", input.display());
            }
        }
        Command::FixAll { dir } => fix_all(&dir)?,
        Command::Analyze { input, dump_xml } => analyze(&input, dump_xml.as_deref())?,
        Command::Fill {
            input,
            data,
            output,
        } => {
            let data = read_data(&data)?;
            fill_docx_file(&input, &output, &data)?;
            eprintln!("Wrote: {}", output.display());
        }
        Command::Templates => {
            let settings = Settings::discover(args.config)?;
            let mut catalog = TemplateCatalog::new(settings.templates_root, settings.index_dir);
            for t in &catalog.index().templates {
                let name = t.name.as_deref().unwrap_or("");
                println!("{}\t{:?}\t{}\t{name}", t.id, t.kind, t.folder);
            }
        }
        Command::Render {
            template,
            data,
            out,
            products,
        } => {
            let settings = Settings::discover(args.config)?;
            let data = read_data(&data)?;
            let catalog = TemplateCatalog::new(settings.templates_root, settings.index_dir);
            let mut renderer = OfferRenderer::new(
                catalog,
                settings.products_root,
                ExternalTools::new(settings.tools),
            );
            let offer = renderer.generate(&template, &data, &products, &out)?;
            println!("docx: {}", offer.docx.display());
            if let Some(pdf) = offer.pdf.as_deref() {
                println!("pdf: {}", pdf.display());
            }
            if let Some(preview) = offer.preview.as_deref() {
                println!("preview: {}", preview.display());
            }
        }
        Command::CheckTools => {
            let settings = Settings::discover(args.config)?;
            let mut missing = 0usize;
            for status in ExternalTools::new(settings.tools).probe() {
                let mark = if status.available { "ok" } else { "missing" };
                println!("{:<8} {:<12} {}", mark, status.name, status.detail);
                missing += usize::from(!status.available);
            }
            if missing > 0 {
                return Err(anyhow::anyhow!("{missing} tool(s) unavailable"));
            }
        }
        Command::InitConfig { dir, force } => {
            let dir = dir
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
            let cfg_path = init_default_config(&dir, force).context("init default config")?;
            eprintln!("Wrote config: {}", cfg_path.display());
        }
    }
    Ok(())
}

fn fixed_output_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    input.with_file_name(format!("{stem}_FIXED.docx"))
}

/// Returns false (and writes nothing) when no template part needed merging.
fn fix_one(input: &Path, output: &Path) -> anyhow::Result<bool> {
    let mut pkg = DocxPackage::read(input)?;
    let report = repair_tags(&mut pkg);
    for (name, reason) in &report.skipped {
        log::warn!("{}: {name} skipped: {reason}", input.display());
    }
    if !report.changed() {
        return Ok(false);
    }
    pkg.write(output)?;
    log::info!("fixed {} part(s) -> {}", report.touched.len(), output.display());
    Ok(true)
}

fn fix_all(dir: &Path) -> anyhow::Result<()> {
    let progress = ConsoleProgress::new(true);
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_template_docx(e.path()))
        .map(|e| e.into_path())
        .collect();
    progress.info(format!("{} template(s) under {}", files.len(), dir.display()));

    let mut fixed = 0usize;
    let mut failed = 0usize;
    for (i, input) in files.iter().enumerate() {
        progress.step("fix", i + 1, files.len(), input.display().to_string());
        match fix_one(input, &fixed_output_for(input)) {
            Ok(true) => fixed += 1,
            Ok(false) => {}
            Err(err) => {
                failed += 1;
                log::error!("{}: {err:#}", input.display());
            }
        }
    }
    progress.info(format!("fixed {fixed}, failed {failed}"));
    Ok(())
}

fn analyze(input: &Path, dump_xml: Option<&Path>) -> anyhow::Result<()> {
    let pkg = DocxPackage::read(input)?;
    if let Some(dump) = dump_xml {
        let xml = pkg
            .part_text("word/document.xml")?
            .context("word/document.xml missing")?;
        std::fs::write(dump, xml).with_context(|| format!("write {}", dump.display()))?;
        eprintln!("Wrote: {}", dump.display());
    }

    for (name, report) in analyze_package(&pkg) {
        let verdict = if report.is_clean() { "ok" } else { "NEEDS FIX" };
        println!(
            "{name}: open {} close {} broken {} [{verdict}]",
            report.open_count,
            report.close_count,
            report.broken_tags.len()
        );
        for tag in &report.broken_tags {
            println!("  broken: {tag}");
        }
        if let Some(xml) = pkg.part_text(&name)? {
            let names: Vec<String> = placeholder_names(&xml).into_iter().collect();
            if !names.is_empty() {
                println!("  fields: {}", names.join(", "));
            }
        }
    }
    Ok(())
}

fn read_data(path: &Path) -> anyhow::Result<FieldMap> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read data: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("data must be a JSON object: {}", path.display()))
}
