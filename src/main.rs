use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flyscript::diagnostic::Diagnostic;
use flyscript::diagnostic::ansi::AnsiRenderer;
use flyscript::vm::program::{ProgramBuilder, listing};
use flyscript::{CompileOptions, Cpu, EngineConfig, Host, ScriptCompiler, ScriptHandler, StdoutScreen};

#[derive(Parser, Debug)]
#[command(name = "flyscript")]
#[command(about = "Run autopilot scripts on a tick-driven engine")]
struct Cli {
    /// Script to run as a program
    script: Option<PathBuf>,

    /// Command to run in the interpreter context (repeatable)
    #[arg(short = 'e', long = "exec")]
    commands: Vec<String>,

    /// Seconds of simulated time per tick
    #[arg(long, default_value_t = 0.02)]
    dt: f64,

    /// Give up after this many ticks
    #[arg(long, default_value_t = 100_000)]
    max_ticks: u64,

    /// Instructions executed per tick
    #[arg(long)]
    ipu: Option<usize>,

    /// JSON engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Restore variables saved by --save-state
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Save variables when the run finishes
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Print timing statistics when a program ends
    #[arg(long)]
    stats: bool,

    /// Print the linked opcode listing instead of running
    #[arg(long)]
    dump: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report(diagnostic: Diagnostic) {
    let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
    eprint!("{}", renderer.render(&diagnostic));
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                report(Diagnostic::error(e.to_string()));
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };
    if let Some(ipu) = cli.ipu {
        config.instructions_per_update = ipu.max(1);
    }
    if cli.stats {
        config.show_statistics = true;
    }

    let script = cli.script.as_deref().map(|path| (path, read_source(path)));

    if cli.dump {
        dump(script.as_ref().map(|(_, s)| s.as_str()), &cli.commands);
        return;
    }

    let host = Host::new()
        .with_screen(StdoutScreen)
        .with_script_handler(ScriptCompiler::new());
    let mut cpu = Cpu::new(config, host);

    if let Some((path, source)) = &script {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("program");
        if let Err(e) = cpu.run_program(source, name, false) {
            report(Diagnostic::from(&e).with_source(source.clone()));
            std::process::exit(1);
        }
    }

    // pushed last so saved variables exist before the script's first tick
    if let Some(path) = &cli.load_state {
        match std::fs::read_to_string(path) {
            Ok(text) => cpu.load_document(&text),
            Err(e) => error!(path = %path.display(), error = %e, "cannot read saved state"),
        }
    }

    let mut ticks = 0;
    run_until_idle(&mut cpu, &cli, &mut ticks);

    // like a terminal, each command is entered once the previous one finished
    for command in &cli.commands {
        if !cpu.is_idle() {
            break;
        }
        if let Err(e) = cpu.run_command(command) {
            report(Diagnostic::from(&e).with_source(command.clone()));
            std::process::exit(1);
        }
        run_until_idle(&mut cpu, &cli, &mut ticks);
    }
    info!(ticks, time = cpu.current_time(), "run finished");

    if !cpu.is_idle() {
        report(
            Diagnostic::warning(format!("stopped after {} ticks with work still pending", ticks))
                .with_note(format!("{} context(s) active", cpu.context_depth())),
        );
    }

    if let Some(path) = &cli.save_state {
        if let Some(json) = cpu.save_document() {
            if let Err(e) = std::fs::write(path, json) {
                error!(path = %path.display(), error = %e, "cannot write saved state");
            }
        }
    }
}

fn run_until_idle(cpu: &mut Cpu, cli: &Cli, ticks: &mut u64) {
    while !cpu.is_idle() && *ticks < cli.max_ticks {
        cpu.update(cli.dt);
        *ticks += 1;
    }
}

fn dump(script: Option<&str>, commands: &[String]) {
    let mut compiler = ScriptCompiler::new();
    let options = CompileOptions::new();
    let sources: Vec<&str> = match script {
        Some(source) => vec![source],
        None => commands.iter().map(String::as_str).collect(),
    };

    let mut builder = ProgramBuilder::new();
    for source in sources {
        match compiler.compile(source, "program", &options) {
            Ok(parts) => {
                builder.add(parts);
            }
            Err(e) => {
                report(Diagnostic::from(&e).with_source(source.to_string()));
                std::process::exit(1);
            }
        }
    }
    print!("{}", listing(&builder.build()));
}
