//! sturdy CLI - robust workbook access from the command line

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sturdy_sheets::memory::MemoryHost;
use sturdy_sheets::{
    AcquireOptions, Automation, Book, CellValue, CloseMode, Keeper, SheetRef, UnobtrusiveOptions,
};
use sturdy_sheets_excel_com::{ExcelBridge, ExcelBridgeConfig};

#[derive(Parser)]
#[command(name = "sturdy")]
#[command(
    author,
    version,
    about = "Open, read and write workbooks in running Excel instances without trampling on them"
)]
struct Cli {
    /// Automation backend
    #[arg(long, value_enum, default_value_t = Backend::Excel)]
    backend: Backend,

    /// Path to excel-com-bridge.exe (default: search next to this binary)
    #[arg(long)]
    bridge_exe: Option<PathBuf>,

    /// WINE executable; pass "none" to run the bridge directly
    #[arg(long)]
    wine: Option<String>,

    /// Seconds to wait for each bridge response
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Log policy decisions
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Simulated host over JSON workbook files
    Memory,
    /// Real Excel through the COM bridge
    Excel,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the state of a workbook
    Info {
        /// Workbook file
        path: PathBuf,
    },

    /// Print a cell value (rows and columns start at 1)
    Get {
        path: PathBuf,
        row: u32,
        col: u32,

        /// Sheet name or 0-based index
        #[arg(short, long, default_value = "0")]
        sheet: String,
    },

    /// Write a cell value and save, leaving the workbook as it was found
    Set {
        path: PathBuf,
        row: u32,
        col: u32,
        /// Number, TRUE/FALSE, or text; empty clears the cell
        value: String,

        /// Sheet name or 0-based index
        #[arg(short, long, default_value = "0")]
        sheet: String,
    },

    /// Acquire a workbook with explicit options and report the result
    Open {
        path: PathBuf,

        /// Acquisition option, e.g. `-o if_unsaved=accept -o force=new`
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// What to do with the workbook afterwards
        #[arg(long, default_value = "keep_open")]
        close: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);
    tracing::debug!(backend = ?cli.backend, "starting");

    match cli.backend {
        Backend::Memory => run(&Keeper::new(MemoryHost::new()), &cli.command),
        Backend::Excel => {
            let config = ExcelBridgeConfig {
                bridge_exe_path: cli.bridge_exe.clone(),
                wine_path: match cli.wine.as_deref() {
                    Some("none") => None,
                    Some(wine) => Some(PathBuf::from(wine)),
                    None => ExcelBridgeConfig::default().wine_path,
                },
                timeout: Duration::from_secs(cli.timeout),
                ..Default::default()
            };
            let bridge = ExcelBridge::start(config).context("Failed to start the Excel bridge")?;
            let keeper = Keeper::new(bridge);
            let result = run(&keeper, &cli.command);
            keeper
                .into_automation()
                .shutdown()
                .context("Failed to shut down the Excel bridge")?;
            result
        }
    }
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("sturdy_sheets=debug,sturdy_sheets_excel_com=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run<A: Automation>(keeper: &Keeper<A>, command: &Commands) -> Result<()> {
    match command {
        Commands::Info { path } => show_info(keeper, path),
        Commands::Get {
            path,
            row,
            col,
            sheet,
        } => get_cell(keeper, path, *row, *col, sheet),
        Commands::Set {
            path,
            row,
            col,
            value,
            sheet,
        } => set_cell(keeper, path, *row, *col, value, sheet),
        Commands::Open {
            path,
            options,
            close,
        } => open(keeper, path, options, close),
    }
}

fn show_info<A: Automation>(keeper: &Keeper<A>, path: &Path) -> Result<()> {
    let read_only = UnobtrusiveOptions {
        writable: false,
        ..Default::default()
    };
    keeper
        .unobtrusively(path, &read_only, |book| {
            print_state(book)?;
            let excel = book.excel();
            println!("Calculation: {:?}", excel.calculation()?);
            println!("Open books:  {}", excel.books()?.len());
            Ok(())
        })
        .with_context(|| format!("Failed to inspect '{}'", path.display()))
}

fn get_cell<A: Automation>(
    keeper: &Keeper<A>,
    path: &Path,
    row: u32,
    col: u32,
    sheet: &str,
) -> Result<()> {
    let sheet = parse_sheet(sheet);
    let read_only = UnobtrusiveOptions {
        writable: false,
        ..Default::default()
    };
    let value = keeper
        .unobtrusively(path, &read_only, |book| book.sheet(sheet).cell(row, col))
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    println!("{value}");
    Ok(())
}

fn set_cell<A: Automation>(
    keeper: &Keeper<A>,
    path: &Path,
    row: u32,
    col: u32,
    value: &str,
    sheet: &str,
) -> Result<()> {
    let sheet = parse_sheet(sheet);
    let value = CellValue::parse_literal(value);
    keeper
        .unobtrusively(path, &UnobtrusiveOptions::default(), |book| {
            book.sheet(sheet).set_cell(row, col, value)
        })
        .with_context(|| format!("Failed to write '{}'", path.display()))
}

fn open<A: Automation>(
    keeper: &Keeper<A>,
    path: &Path,
    pairs: &[String],
    close: &str,
) -> Result<()> {
    let options = AcquireOptions::parse(split_pairs(pairs)?)?;
    let close: CloseMode = close.parse()?;
    let book = keeper
        .acquire(path, &options)
        .with_context(|| format!("Failed to acquire '{}'", path.display()))?;
    print_state(&book)?;
    book.close(close)
        .with_context(|| format!("Failed to close '{}'", path.display()))
}

fn print_state<A: Automation>(book: &Book<'_, A>) -> sturdy_sheets::Result<()> {
    println!("Path:        {}", book.path().display());
    println!("Instance:    {}", book.instance());
    println!("Read-only:   {}", book.read_only()?);
    println!("Saved:       {}", book.saved()?);
    println!("Visible:     {}", book.visible()?);
    Ok(())
}

fn split_pairs(pairs: &[String]) -> Result<Vec<(&str, &str)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => Ok((key, value)),
            None => bail!("Option '{pair}' is not of the form KEY=VALUE"),
        })
        .collect()
}

fn parse_sheet(sheet: &str) -> SheetRef {
    match sheet.parse::<u32>() {
        Ok(index) => SheetRef::Index(index),
        Err(_) => SheetRef::Name(sheet.to_string()),
    }
}
