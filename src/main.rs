use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use mipscachesim::config::{Config, InclusionPolicy, ReplacementPolicy};
use mipscachesim::{Reply, Simulator};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
enum TraceError {
    #[error("line {line}: expected `<core> F|R|W <hex addr> [<hex value>]`, got {text:?}")]
    Malformed { line: usize, text: String },
    #[error("line {line}: core {core} out of range (have {num_cores})")]
    CoreOutOfRange {
        line: usize,
        core: usize,
        num_cores: usize,
    },
}

/// One memory reference from the trace file.
#[derive(Debug, Clone, Copy)]
enum Op {
    Fetch { core: usize, pc: u32 },
    Load { core: usize, addr: u32 },
    Store { core: usize, addr: u32, value: u32 },
}

#[derive(Debug, Parser)]
#[command(author, version, about = "cycle-accurate MIPS32 memory hierarchy simulator")]
struct Options {
    /// Access trace: one `<core> F|R|W <hex addr> [<hex value>]` per line
    #[arg(value_name = "TRACE")]
    trace: PathBuf,

    /// Number of cores
    #[arg(long, default_value_t = 1)]
    cores: usize,

    /// L2 replacement policy
    #[arg(long, value_enum, default_value = "lru")]
    replacement: ReplacementPolicy,

    /// L2 containment policy
    #[arg(long, value_enum, default_value = "inclusive")]
    inclusion: InclusionPolicy,

    /// Abort if the simulation runs longer than this many cycles
    #[arg(long, default_value_t = 10_000_000)]
    max_cycles: u64,

    /// Write the statistics report here instead of stdout
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

fn parse_trace(text: &str, num_cores: usize) -> Result<Vec<Op>, TraceError> {
    let mut ops = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let malformed = || TraceError::Malformed {
            line,
            text: raw.to_string(),
        };
        let mut fields = trimmed.split_whitespace();
        let core: usize = fields
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or_else(malformed)?;
        if core >= num_cores {
            return Err(TraceError::CoreOutOfRange {
                line,
                core,
                num_cores,
            });
        }
        let kind = fields.next().ok_or_else(malformed)?;
        let parse_hex = |field: Option<&str>| {
            field
                .map(|field| field.trim_start_matches("0x"))
                .and_then(|field| u32::from_str_radix(field, 16).ok())
        };
        let addr = parse_hex(fields.next()).ok_or_else(malformed)?;
        let op = match kind {
            "F" | "f" => Op::Fetch { core, pc: addr },
            "R" | "r" => Op::Load { core, addr },
            "W" | "w" => {
                let value = parse_hex(fields.next()).ok_or_else(malformed)?;
                Op::Store { core, addr, value }
            }
            _ => return Err(malformed()),
        };
        if fields.next().is_some() {
            return Err(malformed());
        }
        ops.push(op);
    }
    Ok(ops)
}

fn issue(sim: &mut Simulator, op: Op) -> Reply {
    match op {
        Op::Fetch { core, pc } => sim.fetch(core, pc),
        Op::Load { core, addr } => sim.load(core, addr),
        Op::Store { core, addr, value } => sim.store(core, addr, value),
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let options = Options::parse();
    let mut config = Config {
        num_cores: options.cores,
        l2_inclusion_policy: options.inclusion,
        ..Config::default()
    };
    config.data_cache_l2.replacement_policy = options.replacement;

    let text = fs::read_to_string(&options.trace)
        .wrap_err_with(|| format!("failed to read trace {:?}", options.trace))?;
    let ops = parse_trace(&text, config.num_cores)?;
    log::info!("loaded {} accesses from {:?}", ops.len(), options.trace);

    let mut sim = Simulator::new(config);
    for op in ops {
        loop {
            match issue(&mut sim, op) {
                Reply::Hit { .. } => break,
                Reply::Pending | Reply::MissWithPenalty { .. } => sim.tick(),
            }
            eyre::ensure!(
                sim.cycle() < options.max_cycles,
                "exceeded {} cycles; {op:?} never completed",
                options.max_cycles
            );
        }
    }

    let report = serde_json::to_string_pretty(&sim.stats())?;
    match options.stats_out {
        Some(path) => {
            fs::write(&path, report).wrap_err_with(|| format!("failed to write {path:?}"))?
        }
        None => println!("{report}"),
    }
    Ok(())
}
