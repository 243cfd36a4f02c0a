use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};
use simplelog::{CombinedLogger, Config, WriteLogger};

use opencl_info::{devices_json, UnavailableCompiler};
use opencl_ls::diagnostics::{Diagnostics, DiagnosticsEngine, Source};
use opencl_ls::jsonrpc::OutputCallback;
use opencl_ls::server::{self, LspServer};
use opencl_ls::utils::{ProcessExitHandler, RandomIdGenerator};

#[derive(Parser)]
#[command(name = "opencl-language-server", version, about = "OpenCL Language Server")]
struct Cli {
    /// Enable file logging
    #[arg(short = 'e', long)]
    enable_file_logging: bool,

    /// Path to the log file
    #[arg(short = 'f', long, default_value = "opencl-language-server.log")]
    log_file: PathBuf,

    /// Log level
    #[arg(short = 'l', long, default_value = "trace")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show information about available OpenCL devices
    Clinfo,
    /// Run a single diagnostics pass over a kernel file
    Check {
        /// Kernel source file
        file: PathBuf,
    },
}

fn configure_logging(cli: &Cli) -> server::Result<()> {
    if !cli.enable_file_logging {
        return Ok(());
    }
    CombinedLogger::init(vec![WriteLogger::new(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)?,
    )])?;
    Ok(())
}

fn check(file: &Path) -> server::Result<()> {
    let text = std::fs::read_to_string(file)?;
    let engine = DiagnosticsEngine::new(Rc::new(UnavailableCompiler));
    let source = Source {
        file_path: file.display().to_string(),
        text,
    };
    let diagnostics = engine.diagnostics(&source)?;
    println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    Ok(())
}

fn run_server() -> server::Result<i32> {
    let diagnostics = Rc::new(RefCell::new(DiagnosticsEngine::new(Rc::new(
        UnavailableCompiler,
    ))));
    let output: OutputCallback = Box::new(|message| {
        let mut stdout = io::stdout().lock();
        if let Err(err) = stdout
            .write_all(message.as_bytes())
            .and_then(|_| stdout.flush())
        {
            error!("Failed to write to stdout: {}", err);
        }
    });
    let mut lsp_server = LspServer::new(
        diagnostics,
        Rc::new(RandomIdGenerator),
        Rc::new(ProcessExitHandler),
        output,
    );

    server::install_interrupt_handle(lsp_server.interrupt_flag());
    if let Err(err) = ctrlc::set_handler(server::interrupt) {
        error!("Failed to install the interrupt handler: {}", err);
    }

    let code = lsp_server.run(io::stdin().lock());
    server::clear_interrupt_handle();
    code
}

fn main() -> server::Result<()> {
    let cli = Cli::parse();
    configure_logging(&cli)?;

    match &cli.command {
        Some(Command::Clinfo) => {
            println!("{}", devices_json(&UnavailableCompiler));
            Ok(())
        }
        Some(Command::Check { file }) => check(file),
        None => {
            let code = run_server()?;
            process::exit(code);
        }
    }
}
