use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use spvgen::diagnostics;
use spvgen::generator::{self, Config};
use spvgen::value::Value;

#[macro_use]
extern crate tracing;

/// Generates compute shader sources, and optionally SPIR-V binaries, from
/// GLSL templates and their YAML variant specifications.
#[derive(Parser)]
#[command(name = "spvgen", version, about)]
struct Args {
    /// Directory searched for templates and specifications; repeatable
    #[arg(long = "src-dir", value_name = "DIR", default_value = ".")]
    src_dirs: Vec<PathBuf>,

    /// Directory the generated sources are written to
    #[arg(long, value_name = "DIR", default_value = "gen")]
    out_dir: PathBuf,

    /// Path to the glslc binary; without it only sources are generated
    #[arg(long, value_name = "PATH")]
    glslc: Option<PathBuf>,

    /// Write a YAML registry of the generated shaders to this file
    #[arg(long, value_name = "PATH")]
    registry: Option<PathBuf>,

    /// Extra global binding as KEY=VALUE; repeatable
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Worker threads used for expansion and compilation
    #[arg(long, value_name = "COUNT")]
    jobs: Option<usize>,

    /// Seconds each glslc invocation may take
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    compile_timeout: u64,

    /// Fail the run when shader compilation fails
    #[arg(long)]
    strict: bool,

    /// Keep running and regenerate whenever a source directory changes
    #[arg(long)]
    watch: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<bool> {
    let mut env = generator::default_env();
    for binding in &args.env {
        let (key, value) = parse_binding(binding)?;
        env.insert(key, value);
    }

    let jobs = match args.jobs {
        Some(jobs) => jobs,
        None => std::thread::available_parallelism().map_or(1, |count| count.get()),
    };

    let config = Config {
        src_dirs: args.src_dirs,
        out_dir: args.out_dir,
        glslc: args.glslc,
        registry: args.registry,
        env,
        jobs,
        compile_timeout: Duration::from_secs(args.compile_timeout),
        strict: args.strict,
    };

    if args.watch {
        watch(&config)?;
        Ok(true)
    } else {
        generate(&config)
    }
}

fn generate(config: &Config) -> anyhow::Result<bool> {
    let report = generator::run(config)?;

    for failure in &report.failures {
        diagnostics::emit(failure);
    }

    let generation = report.generation_failures();
    let compile = report.compile_failures();
    if generation > 0 || compile > 0 {
        warn!(generation, compile, "finished with failures");
    } else {
        info!(shaders = report.artifacts.len(), "finished");
    }

    Ok(generation == 0 && (!config.strict || compile == 0))
}

fn watch(config: &Config) -> anyhow::Result<()> {
    use notify::Watcher;

    let (sender, receiver) = std::sync::mpsc::channel();
    let debounce = Duration::from_millis(200);

    let mut watcher =
        notify::PollWatcher::new(sender, debounce).context("could not start the file watcher")?;
    for dir in &config.src_dirs {
        watcher
            .watch(dir, notify::RecursiveMode::Recursive)
            .with_context(|| format!("could not watch '{}'", dir.display()))?;
    }
    info!("watching for changes");

    run_watched(config);

    // keep the watcher around for the duration of the loop so that the
    // channel isn't closed
    let _watcher = watcher;

    while let Ok(event) = receiver.recv() {
        match event {
            notify::DebouncedEvent::Rescan
            | notify::DebouncedEvent::Error(_, _)
            | notify::DebouncedEvent::NoticeWrite(_)
            | notify::DebouncedEvent::NoticeRemove(_) => continue,
            notify::DebouncedEvent::Create(_)
            | notify::DebouncedEvent::Write(_)
            | notify::DebouncedEvent::Chmod(_)
            | notify::DebouncedEvent::Remove(_)
            | notify::DebouncedEvent::Rename(_, _) => {
                run_watched(config);

                // sleep a bit to avoid racing the event queue
                std::thread::sleep(Duration::from_millis(10));

                // skip all events currently in the queue
                while receiver.try_recv().is_ok() {}
            }
        }
    }
    Ok(())
}

fn run_watched(config: &Config) {
    if let Err(error) = generate(config) {
        error!("{error:#}");
    }
}

fn parse_binding(binding: &str) -> anyhow::Result<(String, Value)> {
    let (key, raw) = binding
        .split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got '{binding}'"))?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(raw).with_context(|| format!("could not parse the value of '{key}'"))?;
    let value =
        Value::from_yaml(&yaml).with_context(|| format!("could not use the value of '{key}'"))?;
    Ok((key.to_owned(), value))
}
