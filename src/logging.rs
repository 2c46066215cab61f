//! Process log in the slog text format: `time=… level=… msg="…" k=v`.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

static SINK: OnceLock<Mutex<File>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Opens the process log, truncating whatever the previous run left. Only the
/// first call has an effect; before it every log call is dropped.
pub fn init_log_file(path: &Path) -> Result<()> {
    if SINK.get().is_some() {
        return Ok(());
    }
    let file = open_truncated(path)?;
    let _ = SINK.set(Mutex::new(file));
    Ok(())
}

pub fn debug_kv(msg: &str, kv: &[(&str, &str)]) {
    emit(Level::Debug, msg, kv);
}

pub fn info(msg: impl AsRef<str>) {
    emit(Level::Info, msg.as_ref(), &[]);
}

pub fn info_kv(msg: &str, kv: &[(&str, &str)]) {
    emit(Level::Info, msg, kv);
}

pub fn warn_kv(msg: &str, kv: &[(&str, &str)]) {
    emit(Level::Warn, msg, kv);
}

pub fn error_kv(msg: &str, kv: &[(&str, &str)]) {
    emit(Level::Error, msg, kv);
}

fn emit(level: Level, msg: &str, kv: &[(&str, &str)]) {
    let Some(sink) = SINK.get() else {
        return;
    };
    let line = format_line(Utc::now(), level, msg, kv);
    let mut file = sink.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = file.write_all(line.as_bytes());
}

fn open_truncated(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

fn format_line(at: DateTime<Utc>, level: Level, msg: &str, kv: &[(&str, &str)]) -> String {
    let mut line = format!(
        "time={} level={} msg=\"{}\"",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        level.as_str(),
        escape(msg)
    );
    for (key, value) in kv {
        let _ = write!(line, " {key}={}", field(value));
    }
    line.push('\n');
    line
}

fn field(value: &str) -> Cow<'_, str> {
    let bare = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=');
    if bare {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("\"{}\"", escape(value)))
    }
}

fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['\\', '"', '\n', '\r', '\t']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
