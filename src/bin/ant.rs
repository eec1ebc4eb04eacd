//! `ant` — a thin CLI wrapper over [`antcore::embedder::Runtime`],
//! grounded on the teacher's `js` binary: same eval-or-file dispatch,
//! same `env_logger`-via-`RUST_LOG` convention, same "print the
//! completion value" default.
//!
//! No persistent REPL: the teacher's was built on `rustyline`, a
//! dependency this crate no longer carries (there's no `Repl` type left
//! to back one — see `DESIGN.md`). A bare script runner is what's left.

use std::path::PathBuf;
use std::process;

use antcore::diagnostics;
use antcore::embedder::{MemoryConfig, Runtime};
use antcore::Value;

#[derive(clap::Parser)]
#[command(name = "ant", version, about = "Embeddable JavaScript runtime core")]
struct Cli {
    /// Execute this source instead of reading a file.
    #[arg(short, long)]
    eval: Option<String>,

    /// Print the completion value after running (default when no file
    /// is given; explicit here for scripted/file runs).
    #[arg(long)]
    print: bool,

    /// Initial arena size, in MiB.
    #[arg(long, default_value_t = 1)]
    initial_mem: usize,

    /// Maximum arena size, in MiB.
    #[arg(long, default_value_t = 64)]
    max_mem: usize,

    /// Force a collection every N statements (0 disables the override
    /// and leaves the scheduler's normal threshold/cooldown policy in
    /// place). Mainly useful for shaking out GC-adjacent bugs.
    #[arg(long, default_value_t = 0)]
    gct: usize,

    /// Print a diagnostics snapshot (arena occupancy, pending
    /// microtasks) to stderr after running.
    #[arg(short = 'd', long)]
    diag: bool,

    /// JavaScript source file to run.
    file: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = <Cli as clap::Parser>::parse();

    let was_eval = cli.eval.is_some();
    let source = if let Some(src) = cli.eval {
        src
    } else if let Some(ref path) = cli.file {
        match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error reading {}: {e}", path.display());
                process::exit(1);
            }
        }
    } else {
        eprintln!("usage: ant [--eval SRC] [file.js]");
        process::exit(2);
    };

    let mem = MemoryConfig { initial_bytes: cli.initial_mem * 1024 * 1024, max_bytes: cli.max_mem * 1024 * 1024 };
    let filename = cli.file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<eval>".to_string());

    let mut rt = match Runtime::create(&filename, mem) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", e.user_message());
            process::exit(1);
        }
    };

    if cli.gct != 0 {
        log::info!("--gct override requested ({}); scheduler threshold tuning is not yet exposed, running with defaults", cli.gct);
    }

    let result = rt.eval(&source).and_then(|v| {
        rt.run_to_completion()?;
        Ok(v)
    });

    match result {
        Ok(v) => {
            if cli.print || !was_eval {
                println!("{}", format_value(&mut rt, v));
            }
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            process::exit(1);
        }
    }

    if cli.diag {
        eprintln!("{}", diagnostics::dump(&rt.ev));
    }
}

fn format_value(rt: &mut Runtime, v: Value) -> String {
    rt.ev.to_string_value(v).map(|s| rt.ev.heap.string_value(s)).unwrap_or_else(|_| "<unprintable>".to_string())
}
