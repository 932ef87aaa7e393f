use clap::Parser;
use log::{error, info};
use mips_dynarec::{CoreState, FlatMemory, Jit, JitOptions, RunExit};

fn parse_number(s: &str) -> Result<u32, String> {
    let result = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    result.map_err(|e| format!("invalid number {s:?}: {e}"))
}

/// Runs a flat little endian MIPS binary through the recompiler.
#[derive(Parser, Debug)]
struct CommandLineInterface {
    /// Raw binary, loaded at the start of memory.
    #[clap(short, long)]
    binary: String,

    /// Guest address memory starts at.
    #[clap(long, value_name = "address", default_value = "0", value_parser = parse_number)]
    base: u32,

    /// Address to start executing at, defaults to the base address.
    #[clap(short, long, value_name = "address", value_parser = parse_number)]
    entry: Option<u32>,

    /// Size of guest memory in bytes.
    #[clap(long, value_name = "bytes", default_value = "0x100000", value_parser = parse_number)]
    memory_size: u32,

    /// Cycles to run between returns to the host.
    #[clap(short, long, default_value_t = 100_000)]
    cycles: i32,

    /// Give up after this many cycle slices.
    #[clap(long, value_name = "count")]
    slices: Option<u64>,

    /// Always exit to the dispatcher instead of linking blocks together.
    #[clap(long)]
    no_link: bool,

    /// Mask memory accesses into guest memory instead of range checking them.
    #[clap(long)]
    fast_memory: bool,

    #[clap(long, value_name = "count", default_value_t = JitOptions::default().max_block_instructions)]
    max_block_instructions: usize,

    /// Log the guest and host code of every compiled block.
    #[clap(short, long)]
    dump_blocks: bool,

    /// Log compilation and linking, unless overridden by RUST_LOG.
    #[clap(short, long)]
    verbose: bool,
}

fn main() {
    let cli = CommandLineInterface::parse();
    let default_filter = if cli.verbose || cli.dump_blocks { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let bin = std::fs::read(&cli.binary).unwrap_or_else(|e| {
        eprintln!("failed to read {}: {e}", cli.binary);
        std::process::exit(1);
    });
    let mut memory = FlatMemory::new(cli.base, cli.memory_size as usize);
    if let Err(e) = memory.load(cli.base, &bin) {
        eprintln!("failed to load {}: {e}", cli.binary);
        std::process::exit(1);
    }

    let options = JitOptions {
        enable_block_link: !cli.no_link,
        fast_memory: cli.fast_memory,
        max_block_instructions: cli.max_block_instructions,
        dump_blocks: cli.dump_blocks,
        ..Default::default()
    };
    let mut jit = Jit::new(Box::new(memory), options).unwrap_or_else(|e| {
        eprintln!("failed to create the recompiler: {e}");
        std::process::exit(1);
    });
    jit.state_mut().set_pc(cli.entry.unwrap_or(cli.base));

    let mut slices = 0;
    let code = loop {
        match jit.run_loop_until(cli.cycles) {
            Ok(RunExit::DowncountExpired) => {
                slices += 1;
                if cli.slices.is_some_and(|max| slices >= max) {
                    info!("stopping after {slices} slices of {} cycles", cli.cycles);
                    break 0;
                }
            }
            Ok(RunExit::CoreStateChanged(state)) => {
                info!("guest stopped: {state:?}");
                break if state == CoreState::Halted { 0 } else { 2 };
            }
            Err(e) => {
                error!("{e}");
                break 1;
            }
        }
    };

    println!("{:#?}", jit.state());
    println!("{} blocks compiled", jit.blocks().len());
    std::process::exit(code);
}
