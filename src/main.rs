use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::Parser;

use bflang::error::CompileError;
use bflang::state::{CompilationState, CompilerOptions};

/// Compiler for a small procedural language targeting an eight-primitive
/// tape machine. Compiles one or more source files into a single program.
#[derive(Parser, Debug)]
#[command(name = "bfc", version, about)]
struct Args {
    /// Input source file names, compiled in order into one program
    #[arg(value_name = "FILE", required = true)]
    input: Vec<PathBuf>,

    /// Directories searched for input files not found directly
    #[arg(short = 'I', long = "import-path", value_name = "DIR")]
    import_path: Vec<PathBuf>,

    /// Destination for the compiled tape program
    #[arg(short, long, default_value = "a.b")]
    output: PathBuf,

    /// Destination for the intermediate instruction listing
    #[arg(long = "output-intermediate", value_name = "FILE")]
    output_intermediate: Option<PathBuf>,

    /// Destination for the symbol-table dump
    #[arg(long = "output-symbol-table", value_name = "FILE")]
    output_symbol_table: Option<PathBuf>,

    /// Include temporaries and hidden symbols in the symbol-table dump
    #[arg(long = "verbose-symbol-table")]
    verbose_symbol_table: bool,

    /// Print fully qualified symbol names in comments and dumps
    #[arg(short = 'V', long = "verbose-symbol-names")]
    verbose_symbol_names: bool,

    /// Optimization level: 0 = off, 1 = peephole pass
    #[arg(short = 'O', long, default_value_t = 1, value_name = "LEVEL")]
    optimization: u8,

    /// Annotate the byte stream with IR lines instead of producing a
    /// runnable program (diagnostic artifact)
    #[arg(short, long)]
    debug: bool,

    /// Verbose progress output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if args.verbose { "info" } else { "warn" },
    ))
    .format_timestamp(None)
    .format_target(false)
    .init();

    if let Err(err) = run(&args) {
        // Compile errors carry their own single-line diagnostic and exit
        // code; everything else is an I/O failure.
        match err.downcast::<CompileError>() {
            Ok(compile_err) => {
                eprintln!("{}", compile_err);
                process::exit(compile_err.kind.code());
            }
            Err(other) => {
                eprintln!("{:#}", other);
                process::exit(1);
            }
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let options = CompilerOptions {
        verbose: args.verbose,
        debug: args.debug,
        verbose_symbol_table: args.verbose_symbol_table,
        verbose_symbol_names: args.verbose_symbol_names,
        optimize: args.optimization >= 1,
    };
    log::info!("Debug symbols: {}", if options.debug { "on" } else { "off" });
    log::info!("Optimization level: {}", args.optimization);

    let mut state = CompilationState::new(options);

    for input in &args.input {
        let path = locate_input(input, &args.import_path)
            .with_context(|| format!("Can't locate input file '{}'", input.display()))?;
        let source = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        log::info!("Compiling: {}", path.display());
        bflang::compile_source(&mut state, &path.to_string_lossy(), &source)?;
    }

    if let Some(listing_path) = &args.output_intermediate {
        fs::write(listing_path, bflang::build_listing(&state))
            .with_context(|| format!("Failed to write '{}'", listing_path.display()))?;
        log::info!("Wrote intermediate listing to {}", listing_path.display());
    }

    if let Some(table_path) = &args.output_symbol_table {
        let mut dump = Vec::new();
        state
            .symbols
            .write_dump(
                &mut dump,
                args.verbose_symbol_table,
                args.verbose_symbol_names,
            )
            .context("Failed to format symbol table")?;
        fs::write(table_path, dump)
            .with_context(|| format!("Failed to write '{}'", table_path.display()))?;
        log::info!("Wrote symbol table to {}", table_path.display());
    }

    // Built fully in memory first: a failed compilation leaves no
    // partial binary behind.
    let program = bflang::build_program(&state)?;
    fs::write(&args.output, program)
        .with_context(|| format!("Failed to write '{}'", args.output.display()))?;
    log::info!("Wrote program to {}", args.output.display());

    Ok(())
}

/// The path itself, or the first hit under an import directory.
fn locate_input(input: &Path, import_paths: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if input.is_file() {
        return Ok(input.to_path_buf());
    }
    for dir in import_paths {
        let candidate = dir.join(input);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    anyhow::bail!("not found in any import path");
}
