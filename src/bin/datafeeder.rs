//! The `datafeeder` CLI: loads a curriculum, spawns the trainer child
//! process, and pumps batches to its stdin until the curriculum runs out
//! or the process is asked to stop.

use std::io::{ErrorKind, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGUSR1};
use signal_hook::iterator::Signals;

use datafeeder::reader::{AsyncOpener, EpochOpener, SyncOpener};
use datafeeder::{Curriculum, CurriculumLoader, RunOptions, ShuffleOptions, StateTracker, Trainer};

/// No more than one state dump per this many seconds of wall time, per
/// spec.md \S4.6. Not exposed on the CLI; the source doesn't expose it
/// either.
const STATE_DUMP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "datafeeder", about = "Deterministic, resumable training-data feeder for NMT trainers")]
struct Cli {
    /// Curriculum config file.
    #[arg(long)]
    config: PathBuf,

    /// State file path. Defaults to `<config>.state`.
    #[arg(long)]
    state: Option<PathBuf>,

    #[arg(long = "temporary-directory")]
    temporary_directory: Option<PathBuf>,

    /// Ignore any existing state file and start from the beginning.
    #[arg(long = "do-not-resume")]
    do_not_resume: bool,

    /// Stream each dataset in input order instead of shuffling it.
    #[arg(long = "no-shuffle")]
    no_shuffle: bool,

    /// Disable async look-ahead pre-shuffling; shuffle each epoch inline.
    #[arg(long)]
    sync: bool,

    #[arg(long = "batch-size", default_value_t = 100)]
    batch_size: usize,

    #[arg(long = "chunk-size", default_value_t = 16)]
    chunk_size: usize,

    /// Worker threads for the shuffler and modifier pool. Defaults to the
    /// host's CPU count.
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,

    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// The trainer command and its arguments. Falls back to the config's
    /// `trainer` key when empty.
    #[arg(trailing_var_arg = true)]
    trainer: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("datafeeder: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let level = cli.log_level.parse().unwrap_or(log::LevelFilter::Info);
    datafeeder::logging::init(level, cli.log_file.as_deref())?;

    let curriculum = CurriculumLoader::load_file(&cli.config)?;
    let trainer_command = if !cli.trainer.is_empty() {
        cli.trainer.clone()
    } else {
        curriculum
            .trainer_command
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no trainer command given on the CLI or in the config's `trainer` key"))?
    };

    let state_path = cli.state.clone().unwrap_or_else(|| {
        let mut name = cli.config.clone().into_os_string();
        name.push(".state");
        PathBuf::from(name)
    });

    let workers = cli.workers.unwrap_or_else(num_cpus::get);
    let shuffle_opts = ShuffleOptions {
        workers,
        tmp_dir: cli.temporary_directory.clone(),
        shuffle: !cli.no_shuffle,
        ..ShuffleOptions::default()
    };
    let run_opts = RunOptions {
        batch_size: cli.batch_size,
        chunk_size: cli.chunk_size,
        workers,
    };

    let curriculum = Arc::new(curriculum);
    if cli.sync {
        drive::<SyncOpener>(curriculum, shuffle_opts, run_opts, &state_path, cli.do_not_resume, &trainer_command, !cli.no_shuffle)
    } else {
        drive::<AsyncOpener>(curriculum, shuffle_opts, run_opts, &state_path, cli.do_not_resume, &trainer_command, !cli.no_shuffle)
    }
}

/// Escalation level reached so far by repeated SIGINTs: 0 = none, 1 =
/// close stdin, 2 = SIGTERM, 3 = SIGKILL.
fn drive<O: EpochOpener + Default>(
    curriculum: Arc<Curriculum>,
    shuffle_opts: ShuffleOptions,
    run_opts: RunOptions,
    state_path: &PathBuf,
    do_not_resume: bool,
    trainer_command: &[String],
    shuffle_batches: bool,
) -> anyhow::Result<i32> {
    let mut trainer: Trainer<O> = Trainer::new(curriculum, shuffle_opts, shuffle_batches);
    if !do_not_resume {
        StateTracker::restore_if_present(&mut trainer, state_path)?;
    }

    let (program, args) = trainer_command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("trainer command is empty"))?;
    let mut child = spawn_trainer(program, args)?;
    let mut child_stdin = child.stdin.take();

    let sigint_level = Arc::new(AtomicU8::new(0));
    let print_progress = Arc::new(AtomicBool::new(false));
    let _signal_thread = spawn_signal_watcher(Arc::clone(&sigint_level), Arc::clone(&print_progress))?;

    let mut tracker = StateTracker::new(&mut trainer, state_path.clone(), STATE_DUMP_INTERVAL);
    let mut stdin_closed = child_stdin.is_none();
    let mut terminated = false;

    let run_result = 'pump: loop {
        if print_progress.swap(false, Ordering::Relaxed) {
            log_progress(&tracker);
        }

        match sigint_level.load(Ordering::Relaxed) {
            0 => {}
            1 => {
                if !stdin_closed {
                    log::warn!("SIGINT received, closing trainer stdin");
                    child_stdin = None;
                    stdin_closed = true;
                }
            }
            2 => {
                if !terminated {
                    log::warn!("second SIGINT, sending SIGTERM to trainer");
                    send_signal(&child, libc::SIGTERM);
                    terminated = true;
                }
            }
            _ => {
                log::warn!("third SIGINT, killing trainer");
                let _ = child.kill();
                break 'pump Ok(());
            }
        }

        match tracker.next_batch(run_opts) {
            Some(Ok(batch)) => {
                if let Some(stdin) = child_stdin.as_mut() {
                    if let Err(e) = write_batch(stdin, &batch) {
                        if e.kind() == ErrorKind::BrokenPipe {
                            log::info!("trainer closed its stdin, stopping feed");
                            child_stdin = None;
                        } else {
                            break 'pump Err(e.into());
                        }
                    }
                }
            }
            Some(Err(e)) => break 'pump Err(e.into()),
            None => break 'pump Ok(()),
        }
    };
    tracker.finish();
    drop(child_stdin);

    run_result?;
    let status = child.wait()?;
    Ok(status.code().unwrap_or(1))
}

fn write_batch(stdin: &mut ChildStdin, batch: &[String]) -> std::io::Result<()> {
    for line in batch {
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
    }
    Ok(())
}

fn log_progress<O: EpochOpener + Default>(tracker: &StateTracker<'_, O>) {
    log::info!("stage={:?} progress={:?}", tracker.stage(), tracker.dataset_progress());
}

fn spawn_trainer(program: &str, args: &[String]) -> anyhow::Result<Child> {
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::piped());
    // SAFETY: only calls async-signal-safe `signal(2)` between fork and exec.
    unsafe {
        command.pre_exec(|| {
            libc::signal(libc::SIGINT, libc::SIG_IGN);
            Ok(())
        });
    }
    Ok(command.spawn()?)
}

fn send_signal(child: &Child, signal: libc::c_int) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, signal);
    }
}

/// Spawns the background thread that turns SIGINT/SIGUSR1 into the atomics
/// the pump loop polls. SIGINT is intercepted here (rather than left to the
/// default handler) so the coordinator, not the OS, decides when to stop.
fn spawn_signal_watcher(
    sigint_level: Arc<AtomicU8>,
    print_progress: Arc<AtomicBool>,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGUSR1])?;
    Ok(std::thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT => {
                    sigint_level.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_add(1))).ok();
                }
                SIGUSR1 => print_progress.store(true, Ordering::Relaxed),
                _ => {}
            }
        }
    }))
}
