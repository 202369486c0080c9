use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use xlbridge::cli::{self, EngineOptions};

#[derive(Parser)]
#[command(name = "xlbridge")]
#[command(about = "Read, build and convert spreadsheets (XLSX, CSV, PDF).")]
#[command(long_about = "xlbridge - spreadsheet data interchange

Reads XLSX/CSV workbooks into JSON row grids or header-keyed records,
builds workbooks from headers and rows, applies cell updates and converts
between XLSX, CSV and PDF.

COMMANDS:
  to-array       - Every sheet as a JSON row grid
  file-to-array  - First sheet as records keyed by header slugs
  csv-to-array   - Parse a CSV text file into a list of rows
  create         - Build a workbook from a YAML description
  update         - Apply a JSON update document to a workbook
  convert        - Re-encode a workbook as XLSX, CSV or PDF

EXAMPLES:
  xlbridge to-array report.xlsx --only-sheet 0
  xlbridge create people.yaml people.xlsx
  xlbridge update people.xlsx fixes.json --output people-fixed.xlsx
  xlbridge convert people.xlsx --type Pdf --stdout > people.pdf

Logging goes to stderr; set XLBRIDGE_LOG=xlbridge=debug for load/save detail.")]
#[command(version)]
struct Cli {
    /// YAML engine configuration (file_path, sheet_index, line_limit, modified_by)
    #[arg(long, global = true, env = "XLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Zero-based sheet used by update, save and download
    #[arg(long, global = true, env = "XLBRIDGE_SHEET")]
    sheet: Option<usize>,

    /// Upper bound on rows read per sheet
    #[arg(long, global = true, env = "XLBRIDGE_LINE_LIMIT")]
    line_limit: Option<usize>,

    /// Name stamped as last-modified-by on output
    #[arg(long, global = true, env = "XLBRIDGE_MODIFIED_BY")]
    modified_by: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every sheet as a JSON row grid
    ToArray {
        /// XLSX, CSV or TSV file
        file: PathBuf,

        /// Only read the sheet at this zero-based index
        #[arg(long)]
        only_sheet: Option<usize>,
    },

    /// Print the first sheet as JSON records keyed by header slugs
    FileToArray {
        /// XLSX, CSV or TSV file
        file: PathBuf,

        /// Keep rows hidden in the workbook
        #[arg(long)]
        include_hidden: bool,
    },

    /// Parse a CSV text file into a JSON list of rows
    CsvToArray {
        /// CSV text file
        file: PathBuf,
    },

    #[command(long_about = "Build a workbook from a YAML description.

DOCUMENT FORMAT:
  properties:
    title: Staff
    creator: HR
    keywords: [people, staff]
  headers:
    name: Name
    start: Start Date
  rows:
    - name: Ada
      start: { date: 2023-01-01 }

Header keys map row keys to columns A, B, C, ... in order.")]
    /// Build a workbook from a YAML description
    Create {
        /// YAML document with properties, headers and rows
        document: PathBuf,

        /// Output file
        output: PathBuf,

        /// Xlsx, Csv or Pdf (default: from the output extension)
        #[arg(short = 't', long = "type")]
        output_type: Option<String>,
    },

    #[command(long_about = "Apply a JSON update document to a workbook.

DOCUMENT FORMAT (row number → column letters → value):
  {
    \"2\": {
      \"A\": \"text\",
      \"B\": { \"value\": 1, \"options\": { \"lock\": true } },
      \"C\": { \"datetime\": \"2023-01-01T00:00:00\" },
      \"D\": null
    }
  }

All entries are validated before any cell changes.")]
    /// Apply a JSON update document to a workbook
    Update {
        /// Workbook to update
        file: PathBuf,

        /// JSON update document
        instructions: PathBuf,

        /// Write here instead of overwriting FILE
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Xlsx, Csv or Pdf (default: from the target extension)
        #[arg(short = 't', long = "type")]
        output_type: Option<String>,
    },

    /// Re-encode a workbook as XLSX, CSV or PDF
    Convert {
        /// Workbook to read
        file: PathBuf,

        /// Output file
        #[arg(required_unless_present = "stdout")]
        output: Option<PathBuf>,

        /// Xlsx, Csv or Pdf (default: from the output extension)
        #[arg(short = 't', long = "type")]
        output_type: Option<String>,

        /// Write the encoded bytes to stdout
        #[arg(long)]
        stdout: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("XLBRIDGE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "xlbridge=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let options = EngineOptions {
        config: cli.config,
        sheet: cli.sheet,
        line_limit: cli.line_limit,
        modified_by: cli.modified_by,
    };

    match cli.command {
        Commands::ToArray { file, only_sheet } => cli::to_array(&options, file, only_sheet),

        Commands::FileToArray {
            file,
            include_hidden,
        } => cli::file_to_array(&options, file, include_hidden),

        Commands::CsvToArray { file } => cli::csv_to_array(file),

        Commands::Create {
            document,
            output,
            output_type,
        } => cli::create(&options, document, output, output_type),

        Commands::Update {
            file,
            instructions,
            output,
            output_type,
        } => cli::update(&options, file, instructions, output, output_type),

        Commands::Convert {
            file,
            output,
            output_type,
            stdout,
        } => cli::convert(&options, file, output, output_type, stdout),
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("{} {:#}", "Error:".bold().red(), err);
        std::process::exit(1);
    }
    Ok(())
}
