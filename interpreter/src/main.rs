use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;

use bf_interp::{Config, Halt, Machine};

/// Interpreter for compiled tape-machine programs (`+ - < > . , [ ]` plus
/// the `@` halt extension).
#[derive(Parser, Debug)]
#[command(name = "bfi", version, about)]
struct Args {
    /// Program file to execute
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of cells on the tape
    #[arg(short, long, default_value_t = bf_interp::DEFAULT_MEMORY)]
    memory: usize,

    /// Initial value for every cell
    #[arg(long, default_value_t = 0)]
    init: u8,

    /// Scripted input: a list of byte values consumed before --const
    /// takes over
    #[arg(long = "stdin", value_name = "BYTE", num_args = 1..)]
    scripted_input: Option<Vec<u8>>,

    /// Value read once scripted input is exhausted
    #[arg(short = 'c', long = "const", default_value_t = 0)]
    const_value: u8,

    /// Read input as decimal numbers, one per line (e.g. "65" reads 'A')
    #[arg(short = 'u', long = "numerical-input")]
    numerical_input: bool,

    /// Write output as decimal numbers instead of raw bytes
    #[arg(short = 'U', long = "numerical-output")]
    numerical_output: bool,

    /// Dump memory and pause at these instruction offsets
    #[arg(short, long, value_name = "OFFSET", num_args = 1..)]
    breakpoints: Option<Vec<usize>>,

    /// Dump memory to stderr whenever this character is executed
    #[arg(short, long, value_name = "CHAR")]
    debug: Option<char>,

    /// Pause for enter at every debug-character dump
    #[arg(short = 'D', long = "debug-interrupt")]
    debug_interrupt: bool,

    /// Verbose output
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

    match run(&args) {
        Ok(Halt::Finished) => {}
        Ok(Halt::Exited(code)) => {
            log::info!("Exit instruction encountered");
            process::exit(code as i32);
        }
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(1);
        }
    }
}

fn run(args: &Args) -> anyhow::Result<Halt> {
    let code = fs::read_to_string(&args.input)
        .with_context(|| format!("Could not open program file '{}'", args.input.display()))?;
    log::info!("Running {}", args.input.display());

    let config = Config {
        memory_size: args.memory,
        init_value: args.init,
    };
    let mut machine = Machine::new(&code, &config);

    let mut input: Box<dyn Read> = match &args.scripted_input {
        Some(values) => Box::new(ScriptedInput {
            values: values.iter().copied().collect(),
            fallback: args.const_value,
        }),
        None if args.numerical_input => Box::new(NumericalStdin),
        None => Box::new(io::stdin()),
    };
    let stdout = io::stdout();
    let mut output: Box<dyn Write> = if args.numerical_output {
        Box::new(NumericalOutput(stdout))
    } else {
        Box::new(stdout)
    };

    let breakpoints = args.breakpoints.clone().unwrap_or_default();
    let debug_char = args.debug.map(|c| c as u8);

    let halt = loop {
        if let Some(op) = machine.current() {
            let at_debug = debug_char == Some(op);
            let at_breakpoint = breakpoints.contains(&machine.pc());
            if at_debug {
                machine.dump(&mut io::stderr())?;
            }
            if at_breakpoint || (at_debug && args.debug_interrupt) {
                output.flush().ok();
                eprintln!("Breakpoint at {} hit", machine.pc());
                machine.dump(&mut io::stderr())?;
                eprint!("Press enter to continue...");
                io::stderr().flush().ok();
                let mut line = String::new();
                io::stdin().lock().read_line(&mut line).ok();
            }
        }
        if let Some(halt) = machine.step(&mut input, &mut output)? {
            break halt;
        }
    };
    output.flush().ok();

    log::info!("Memory high-water mark: {:#X}", machine.max_used());
    Ok(halt)
}

/// Fixed input script with a constant fallback; never reports EOF.
struct ScriptedInput {
    values: VecDeque<u8>,
    fallback: u8,
}

impl Read for ScriptedInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.values.pop_front().unwrap_or(self.fallback);
        Ok(1)
    }
}

/// Reads one decimal number per line from stdin, yielding it as a byte.
struct NumericalStdin;

impl Read for NumericalStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(0);
        }
        let value = line.trim().parse::<u8>().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid input: {}", e))
        })?;
        buf[0] = value;
        Ok(1)
    }
}

/// Writes each byte as its decimal value.
struct NumericalOutput<W: Write>(W);

impl<W: Write> Write for NumericalOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for byte in buf {
            write!(self.0, "{} ", byte)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
