//! Timestamped log lines for the client.
//!
//! Everything logs through [`tlog!`], which writes
//!
//! ```text
//! 20261018T09:15:00.000 - src/reconcile.rs:42 - reconcile: m-5f2c9a1 from u-a81b0c2 outside the open thread
//! ```
//!
//! to stderr by default. The terminal client sends logs to a file with
//! [`log_to_file`] so they do not interleave with the prompt. Colour is only
//! used when the destination is a terminal.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

struct Sink {
    writer: Box<dyn Write + Send>,
    colour: bool,
}

static SINK: LazyLock<Mutex<Sink>> = LazyLock::new(|| {
    Mutex::new(Sink {
        writer: Box::new(io::stderr()),
        colour: false,
    })
});

fn sink() -> std::sync::MutexGuard<'static, Sink> {
    SINK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Enable colour when stderr is a terminal. Call once at startup.
pub fn init() {
    sink().colour = io::stderr().is_terminal();
}

/// Send all further log lines to `w`, without colour.
pub fn set_writer(w: Box<dyn Write + Send>) {
    let mut sink = sink();
    sink.writer = w;
    sink.colour = false;
}

/// Append log lines to the file at `path`, creating it if needed.
pub fn log_to_file(path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    set_writer(Box::new(file));
    Ok(())
}

pub fn colour_enabled() -> bool {
    sink().colour
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const MESSAGE_COLOUR: &str = "\x1b[93m";

const USER_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[94m", "\x1b[95m", "\x1b[96m", "\x1b[32m", "\x1b[34m",
    "\x1b[35m", "\x1b[36m",
];

/// Characters of an id kept in log output.
const SHORT_ID_LEN: usize = 7;

fn short(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn tagged(tag: char, id: &str, colour: Option<&str>) -> String {
    match colour {
        Some(c) if colour_enabled() => format!("{c}{tag}-{}{RESET}", short(id)),
        _ => format!("{tag}-{}", short(id)),
    }
}

/// `u-5f2c9a1`: a user id, shortened. Each user keeps the same colour.
pub fn user_id(id: &str) -> String {
    let hash = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    let colour = USER_COLOURS[hash as usize % USER_COLOURS.len()];
    tagged('u', id, Some(colour))
}

/// `m-0c1d2e3`: a message id, shortened.
pub fn msg_id(id: &str) -> String {
    tagged('m', id, Some(MESSAGE_COLOUR))
}

/// Broken-down UTC time: `(year, month, day, hour, minute, second)`.
pub(crate) fn civil_from_unix(secs: u64) -> (i64, u64, u64, u64, u64, u64) {
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    // Days since epoch to a civil date (Howard Hinnant's algorithm).
    let days = (secs / 86400) as i64;
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    (y, m, d, hours, minutes, seconds)
}

/// Current time as `YYYYMMDDTHH:MM:SS.mmm`.
pub fn format_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let (y, mo, d, h, mi, s) = civil_from_unix(now.as_secs());
    format!(
        "{y:04}{mo:02}{d:02}T{h:02}:{mi:02}:{s:02}.{:03}",
        now.subsec_millis()
    )
}

/// Write one line. Used by [`tlog!`].
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let mut sink = sink();
    let formatted = if sink.colour {
        format!("{DIM}{ts}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    let _ = writeln!(sink.writer, "{formatted}");
    let _ = sink.writer.flush();
}

/// Log a formatted line with timestamp and source location.
///
/// ```ignore
/// tlog!("realtime: joined {}", channel);
/// tlog!("api: marked {} message(s) from {} as read", n, logging::user_id(&sender));
/// ```
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}
