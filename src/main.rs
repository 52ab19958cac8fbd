//! CLI Entry Point for ro-script
//!
//! Runs a built-in demonstration script against mock collaborators on a
//! single-threaded tokio event loop, so the runner's behavior (and its
//! logging) can be observed without real hardware.
//!
//! # Usage
//!
//! ```bash
//! ro-script demo
//! ro-script demo --debug
//! ro-script --config ro-script.toml demo
//! ro-script show-config
//! ```

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::Notify;

use ro_script::{
    callback, logging, CommandSpec, KeyVar, LocalScheduler, MockDispatcher,
    RunnerConfig, Scheduler, ScriptError, ScriptHandle, ScriptResult, ScriptRunner, Severity,
};

#[derive(Parser)]
#[command(name = "ro-script")]
#[command(about = "Cooperative script runner demo", long_about = None)]
struct Cli {
    /// Optional configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demonstration script against mock hardware
    Demo {
        /// Short-circuit every wait (dry run)
        #[arg(long)]
        debug: bool,

        /// Simulated command duration in milliseconds
        #[arg(long, default_value = "300")]
        command_ms: u64,
    },

    /// Print the effective configuration
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load_from(path)?,
        None => RunnerConfig::load()?,
    };

    match cli.command {
        Commands::Demo { debug, command_ms } => {
            config.debug_mode |= debug;
            logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
            run_demo(&config, Duration::from_millis(command_ms))
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_demo(config: &RunnerConfig, command_time: Duration) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, demo(config.clone(), command_time))
}

async fn demo(config: RunnerConfig, command_time: Duration) -> Result<()> {
    let scheduler = Rc::new(LocalScheduler::new());
    let dispatcher = Rc::new(MockDispatcher::timed(scheduler.clone(), command_time));
    let tcc_pos = KeyVar::new("tcc.pos");

    // Simulated telescope position updates
    for (delay_ms, pos) in [(150_u64, json!([10.0, 20.0])), (450, json!([10.5, 20.2]))] {
        let var = tcc_pos.clone();
        scheduler.schedule_after(
            Duration::from_millis(delay_ms),
            Box::new(move || var.set(pos)),
        );
    }

    let done = Rc::new(Notify::new());
    let finished = done.clone();
    let var = tcc_pos.clone();
    let runner = ScriptRunner::builder("demo", scheduler.clone())
        .config(&config)
        .dispatcher(dispatcher.clone())
        .on_state_change(callback(move |runner: &ScriptRunner| {
            if runner.is_done() {
                finished.notify_one();
            }
            Ok(())
        }))
        .on_end(|sr| {
            sr.show_message("demo script ended", Severity::Normal);
            Ok(())
        })
        .build_fn(move |sr| demo_script(sr, var.clone()));

    runner.start()?;
    if !runner.is_done() {
        done.notified().await;
    }

    let state = runner.full_state();
    println!("state:  {}", state.state_name);
    if !state.reason.is_empty() {
        println!("reason: {}", state.reason);
    }
    println!("value:  {}", runner.value());
    if runner.debug_mode() {
        for record in runner.debug_log() {
            println!("skipped: {record:?}");
        }
    }
    Ok(())
}

async fn demo_script(sr: ScriptHandle, tcc_pos: Rc<KeyVar>) -> ScriptResult {
    sr.show_message("slewing", Severity::Normal);
    sr.wait_cmd(CommandSpec::new("tcc", "track 10,20"), true)?.await;

    let pos = sr.wait_key_var(tcc_pos.clone(), None, false)?.await;
    sr.show_message(&format!("at {pos}"), Severity::Normal);

    let guider = sr.start_cmd(CommandSpec::new("gcam", "expose 1.5"), true)?;
    let science = sr.start_cmd(CommandSpec::new("dis", "expose 5"), true)?;
    sr.wait_cmd_vars(vec![guider, science], true, json!("exposed"))?.await;

    let fwhm = sr
        .wait_thread(|| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(json!(1.25))
        })?
        .await;

    let offset = sr.call("refine", refine(sr.clone(), fwhm.clone())).await?;
    sr.wait_ms(100)?.await;
    Ok(json!({ "fwhm": fwhm, "offset": offset }))
}

async fn refine(sr: ScriptHandle, fwhm: Value) -> ScriptResult {
    let fwhm = fwhm.as_f64().unwrap_or(0.0);
    if fwhm > 5.0 {
        return Err(ScriptError::new(format!("seeing too poor: fwhm {fwhm}")).into());
    }
    sr.wait_cmd(CommandSpec::new("tcc", "offset guide 0.1,0.0"), true)?.await;
    Ok(json!(fwhm * 0.1))
}
