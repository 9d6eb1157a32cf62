//! CLI output formatting utilities.
//!
//! Colored status lines, durations and the error report printed on failure.

use std::time::Duration;

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const SKIP: &str = "↷";
  pub const INFO: &str = "•";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// `error: <message>` followed by one `caused by:` line per source.
pub fn format_error_chain(err: &anyhow::Error) -> String {
  let mut report = format!("error: {err}");
  for cause in err.chain().skip(1) {
    report.push_str(&format!("\n  caused by: {cause}"));
  }
  report
}

pub fn print_error_chain(err: &anyhow::Error) {
  eprintln!(
    "{}",
    format_error_chain(err).if_supports_color(Stream::Stderr, |s| s.red())
  );
}
