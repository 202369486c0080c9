use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::excel::OutputType;
use crate::types::{DataRow, HeaderMap, PropertyInput, UpdateInstructions};

/// Engine settings shared by every command, layered over an optional
/// YAML config file.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub config: Option<PathBuf>,
    pub sheet: Option<usize>,
    pub line_limit: Option<usize>,
    pub modified_by: Option<String>,
}

impl EngineOptions {
    /// Config file first, then flag overrides.
    pub fn resolve(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_yaml_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(sheet) = self.sheet {
            config.sheet_index = sheet;
        }
        if self.line_limit.is_some() {
            config.line_limit = self.line_limit;
        }
        if let Some(name) = &self.modified_by {
            config.modified_by = name.clone();
        }
        Ok(config)
    }

    fn engine(&self) -> anyhow::Result<Engine> {
        Ok(Engine::with_config(self.resolve()?)?)
    }

    fn engine_for(&self, file: &Path) -> anyhow::Result<Engine> {
        let mut config = self.resolve()?;
        config.file_path = Some(file.to_path_buf());
        Ok(Engine::with_config(config)?)
    }
}

/// Workbook description read by `create`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDocument {
    #[serde(default)]
    pub properties: PropertyInput,
    pub headers: HeaderMap,
    #[serde(default)]
    pub rows: Vec<DataRow>,
}

/// Output type from an explicit `--type`, else from the target's extension,
/// else XLSX.
pub fn resolve_output_type(explicit: Option<&str>, target: Option<&Path>) -> String {
    if let Some(kind) = explicit {
        return kind.to_string();
    }
    target
        .and_then(|path| path.extension())
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse::<OutputType>().ok())
        .unwrap_or_default()
        .to_string()
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_degraded(engine: &Engine) {
    for message in engine.errors() {
        eprintln!("{} {}", "warning:".yellow().bold(), message);
    }
}

/// Print every sheet (or one) of `file` as a JSON row grid.
pub fn to_array(options: &EngineOptions, file: PathBuf, only_sheet: Option<usize>) -> anyhow::Result<()> {
    let mut engine = options.engine_for(&file)?;
    let grid = engine.to_array(only_sheet)?;
    report_degraded(&engine);
    print_json(&grid)
}

/// Print the first sheet of `file` as header-keyed JSON records.
pub fn file_to_array(options: &EngineOptions, file: PathBuf, include_hidden: bool) -> anyhow::Result<()> {
    let mut engine = options.engine()?;
    let records = engine.excel_file_to_array(&file, include_hidden)?;
    report_degraded(&engine);
    print_json(&records)
}

pub fn csv_to_array(file: PathBuf) -> anyhow::Result<()> {
    let text = fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    let rows = Engine::new().excel_csv_to_array(&text)?;
    print_json(&rows)
}

/// Build a workbook from a YAML description and save it to `output`.
pub fn create(
    options: &EngineOptions,
    document: PathBuf,
    output: PathBuf,
    output_type: Option<String>,
) -> anyhow::Result<()> {
    println!("{}", "xlbridge - Create".bold().green());
    println!("   Input:  {}", document.display());
    println!("   Output: {}", output.display());

    let content = fs::read_to_string(&document)
        .with_context(|| format!("reading {}", document.display()))?;
    let doc: CreateDocument = serde_yaml::from_str(&content)
        .with_context(|| format!("parsing {}", document.display()))?;

    let kind = resolve_output_type(output_type.as_deref(), Some(output.as_path()));
    let mut engine = options.engine()?;
    engine.create(doc.properties, &doc.headers, &doc.rows)?;
    engine.save(Some(output.as_path()), &kind)?;

    println!(
        "{} {} columns, {} rows as {}",
        "Created:".bold().green(),
        doc.headers.len(),
        doc.rows.len(),
        kind.cyan()
    );
    Ok(())
}

/// Apply a JSON update document to `file` and save in place or to `output`.
pub fn update(
    options: &EngineOptions,
    file: PathBuf,
    instructions: PathBuf,
    output: Option<PathBuf>,
    output_type: Option<String>,
) -> anyhow::Result<()> {
    println!("{}", "xlbridge - Update".bold().green());
    println!("   File:         {}", file.display());
    println!("   Instructions: {}", instructions.display());

    let content = fs::read_to_string(&instructions)
        .with_context(|| format!("reading {}", instructions.display()))?;
    let updates: UpdateInstructions = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", instructions.display()))?;

    let target = output.unwrap_or_else(|| file.clone());
    let kind = resolve_output_type(output_type.as_deref(), Some(target.as_path()));

    let mut engine = options.engine_for(&file)?;
    engine.update_from_array(&updates)?;
    engine.save(Some(target.as_path()), &kind)?;
    report_degraded(&engine);

    let cells: usize = updates.values().map(|row| row.len()).sum();
    println!(
        "{} {} cells in {} rows → {}",
        "Updated:".bold().green(),
        cells,
        updates.len(),
        target.display()
    );
    Ok(())
}

/// Re-encode `file` as another output type, to a file or to stdout.
pub fn convert(
    options: &EngineOptions,
    file: PathBuf,
    output: Option<PathBuf>,
    output_type: Option<String>,
    stdout: bool,
) -> anyhow::Result<()> {
    let kind = resolve_output_type(output_type.as_deref(), output.as_deref());
    let mut engine = options.engine_for(&file)?;

    if stdout {
        engine.download(&kind)?;
        return Ok(());
    }
    let Some(output) = output else {
        bail!("an OUTPUT path or --stdout is required");
    };

    engine.save(Some(output.as_path()), &kind)?;
    report_degraded(&engine);
    println!(
        "{} {} → {} ({})",
        "Converted:".bold().green(),
        file.display(),
        output.display(),
        kind.cyan()
    );
    Ok(())
}
