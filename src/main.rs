use clap::Parser;
use gdbadapter::GdbHost;
use uefiext::{Environment, UefiExtension};

mod repl;

/// Debug UEFI firmware through GDB with the uefiext commands
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// GDB executable to drive
    #[arg(long, env = "UEFIDBG_GDB", default_value = "gdb-multiarch")]
    gdb: String,

    /// Remote stub to connect to, e.g. localhost:5555
    #[arg(short, long, env = "UEFIDBG_TARGET")]
    target: Option<String>,

    /// Initial environment (PEI, DXE, MM or rust)
    #[arg(long)]
    env: Option<Environment>,

    /// Run `init` once connected
    #[arg(long, default_value_t = false)]
    init: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = log_level(args.verbose);
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .with_module_level("rustyline", log::LevelFilter::Warn)
        .with_module_level("gdbadapter", level)
        .init()?;

    log::info!("uefidbg starting, GDB: {}", args.gdb);

    let mut host = GdbHost::launch(&args.gdb)?;
    let mut extension = UefiExtension::with_environment(args.env.unwrap_or_default());

    if let Some(target) = &args.target {
        host.connect_remote(target)?;
        if args.init {
            if let Err(e) = extension.dispatch(&mut host, "init", "") {
                log::error!("init failed: {}", e);
            }
        }
    } else if args.init {
        log::warn!("--init needs --target, skipping");
    }

    let result = repl::run(&mut host, &mut extension);

    if let Err(e) = host.shutdown() {
        log::warn!("GDB did not exit cleanly: {}", e);
    }

    log::info!("Exited in environment {}", extension.environment());
    result
}
