//! pvpanic-sim - drive a simulated pvpanic device with guest port I/O
//!
//! Commands:
//! - `pvpanic-sim run OPS...` - execute guest `in`/`out` accesses
//! - `pvpanic-sim info` - show properties, mounted regions and fw-cfg files

mod machine;
mod ops;

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use pvpanic::{PvPanicConfig, RunState, TYPE_NAME, USER_CREATABLE};
use serde_json::json;
use vmm_mock::HostEffect;

use machine::{Access, Machine, MachineFile};
use ops::GuestOp;

#[derive(Parser)]
#[command(name = "pvpanic-sim")]
#[command(author = "KaaL Team")]
#[command(version)]
#[command(about = "Simulate guest accesses to a pvpanic device", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute guest port operations
    Run {
        #[command(flatten)]
        machine: MachineArgs,

        /// Print one JSON object per line
        #[arg(long)]
        json: bool,

        /// Issue `cont` after a guest panic instead of stopping
        #[arg(long)]
        resume: bool,

        /// Operations: in[:PORT], out:VALUE, out:PORT=VALUE
        #[arg(required = true, value_name = "OP")]
        ops: Vec<GuestOp>,
    },

    /// Show device properties, mounted regions and fw-cfg files
    Info {
        #[command(flatten)]
        machine: MachineArgs,
    },
}

#[derive(Args)]
struct MachineArgs {
    /// Machine description (TOML)
    #[arg(short, long)]
    machine: Option<PathBuf>,

    /// Add a pvpanic device, e.g. `-d ioport=0x600` (repeatable)
    #[arg(short = 'd', long = "device", value_name = "PROPS")]
    devices: Vec<String>,

    /// Board without a fw-cfg table
    #[arg(long)]
    no_fw_cfg: bool,
}

impl MachineArgs {
    fn resolve(&self) -> anyhow::Result<MachineFile> {
        let mut file = match &self.machine {
            Some(path) => MachineFile::load(path)?,
            None => MachineFile::default(),
        };

        for props in &self.devices {
            let mut config = PvPanicConfig::default();
            config.apply_properties(props)?;
            file.devices.push(config);
        }
        if self.no_fw_cfg {
            file.fw_cfg = false;
        }

        Ok(file)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(log_level(cli.verbose))
        .parse_default_env()
        .init();

    match cli.command {
        Commands::Run {
            machine,
            json,
            resume,
            ops,
        } => {
            run(&machine.resolve()?, &ops, json, resume)?;
        }

        Commands::Info { machine } => {
            show_info(&machine.resolve()?)?;
        }
    }

    Ok(())
}

/// `-v` count to log level; `RUST_LOG` still overrides per target
fn log_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn run(file: &MachineFile, ops: &[GuestOp], json: bool, resume: bool) -> anyhow::Result<()> {
    let mut machine = Machine::build(file)?;

    if !json {
        println!(
            "{} pvpanic at {}",
            "▶".green(),
            machine
                .ports()
                .iter()
                .map(|p| format!("{:#x}", p))
                .collect::<Vec<_>>()
                .join(", ")
                .bold()
        );
    }

    for (i, &op) in ops.iter().enumerate() {
        let access = machine.execute(op);
        if json {
            print_json(&access)?;
        } else {
            print_text(&access)?;
        }

        if machine.run_state() == RunState::GuestPanicked {
            if resume {
                machine.resume();
                if !json {
                    println!("    {} cont", "↻".cyan());
                }
            } else {
                let skipped = ops.len() - i - 1;
                if json {
                    println!("{}", stop_record(skipped));
                } else if skipped > 0 {
                    println!(
                        "{} VM stopped, {} operation(s) not executed",
                        "■".red(),
                        skipped
                    );
                }
                break;
            }
        }
    }

    if !json {
        println!("{} run state: {}", "●".green(), run_state_name(machine.run_state()).bold());
    }

    Ok(())
}

fn print_text(access: &Access) -> anyhow::Result<()> {
    match (access.op, access.value) {
        (GuestOp::In { .. }, Some(value)) => {
            println!("  in  {:#06x} -> {:#04x}", access.port, value)
        }
        (GuestOp::In { .. }, None) => println!("  in  {:#06x}", access.port),
        (GuestOp::Out { value, .. }, _) => {
            println!("  out {:#06x} <- {:#04x}", access.port, value)
        }
    }

    if let Some(err) = &access.error {
        println!("    {} {}", "!".red().bold(), err);
    }

    for effect in &access.effects {
        match effect {
            HostEffect::Monitor(event) => println!(
                "    {} {}",
                "event".yellow(),
                serde_json::to_string(event)?
            ),
            HostEffect::RunState(state) => {
                println!("    {} {}", "run-state".magenta(), run_state_name(*state))
            }
        }
    }

    Ok(())
}

fn print_json(access: &Access) -> anyhow::Result<()> {
    let (op, value) = match access.op {
        GuestOp::In { .. } => ("in", access.value),
        GuestOp::Out { value, .. } => ("out", Some(value)),
    };
    println!(
        "{}",
        json!({
            "op": op,
            "port": access.port,
            "value": value,
            "error": access.error.as_ref().map(|e| e.to_string()),
        })
    );

    for effect in &access.effects {
        let line = match effect {
            HostEffect::Monitor(event) => serde_json::to_value(event)?,
            HostEffect::RunState(state) => json!({ "run_state": state }),
        };
        println!("{}", line);
    }

    Ok(())
}

/// JSON line marking where a stopped VM cut the op list short
fn stop_record(skipped: usize) -> serde_json::Value {
    json!({ "stopped": true, "skipped": skipped })
}

fn run_state_name(state: RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::GuestPanicked => "guest-panicked",
    }
}

fn show_info(file: &MachineFile) -> anyhow::Result<()> {
    let machine = Machine::build(file)?;

    println!("{}", format!("Device '{}'", TYPE_NAME).bold().green());
    println!("  user creatable: {}", if USER_CREATABLE { "yes" } else { "no" });
    println!("\n{}", "Properties:".bold());
    for prop in PvPanicConfig::PROPERTIES {
        println!(
            "  {:<8} {:?} (default {:#x})",
            prop.name, prop.kind, prop.default
        );
    }

    println!("\n{}", "I/O regions:".bold());
    for region in machine.bus.regions() {
        println!(
            "  {:#06x}-{:#06x} {}",
            region.base,
            region.base as u32 + region.size as u32 - 1,
            region.name
        );
    }

    println!("\n{}", "fw_cfg:".bold());
    match &machine.fw_cfg {
        Some(table) if !table.is_empty() => {
            for (name, data) in table.files() {
                let bytes: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
                println!("  {:<24} [{}]", name, bytes.join(" "));
            }
        }
        Some(_) => println!("  {}", "(empty)".italic()),
        None => println!("  {}", "(not present)".italic()),
    }

    Ok(())
}
