//! Logger set-up: stderr always, optionally teed to a per-run log file.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

/// Writes every log line to stderr and a file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// `pals-<YYYYmmddHHMMSS>-<pid>.log`
pub fn log_file_name() -> String {
    format!(
        "pals-{}-{}.log",
        chrono::Local::now().format("%Y%m%d%H%M%S"),
        std::process::id()
    )
}

/// Initialise the global logger. Returns the log file path when one was opened.
pub fn setup_logging(verbose: bool, to_file: bool, debug: bool) -> Result<Option<PathBuf>> {
    let default_level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    builder.format(move |buf, record| {
        let ts = buf.timestamp_seconds();
        if debug {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            )
        } else {
            writeln!(buf, "[{} {}] {}", ts, record.level(), record.args())
        }
    });

    let path = if to_file {
        let path = PathBuf::from(log_file_name());
        let mut file = File::create(&path)
            .with_context(|| format!("Could not open log file: {}", path.display()))?;
        let args: Vec<String> = std::env::args().collect();
        writeln!(file, "{}", args.join(" "))
            .with_context(|| format!("Could not write log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
        Some(path)
    } else {
        None
    };

    builder.try_init().context("Logger already initialised")?;
    Ok(path)
}
