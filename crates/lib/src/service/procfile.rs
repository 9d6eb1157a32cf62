//! Procfile parsing and entrypoint synthesis.
//!
//! The entrypoint is a bash script that sources `.profile.d` and then execs
//! the command of the process named by its first argument.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::consts::{ENTRYPOINT_FILENAME, PROCFILE_FILENAME};

#[derive(Debug, Error)]
pub enum ProcfileError {
  #[error("no such file: {}", .path.display())]
  Missing { path: PathBuf },

  #[error("unexpected line in Procfile: {line}")]
  Format { line: String },

  #[error("failed to {action} {}", .path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One process declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
  pub name: String,
  /// The command, already quoted for the shell.
  pub command: String,
}

static PROCFILE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([^:]+):?\s+(.*)$").expect("valid regex"));

/// Process names become `case` patterns in the entrypoint, so they stay plain words.
static PROCESS_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid regex"));

pub fn parse_procfile(content: &str) -> Result<Vec<Process>, ProcfileError> {
  let mut processes = Vec::new();
  for line in content.lines() {
    let trimmed = line.trim();
    if trimmed.is_empty() || line.starts_with('#') {
      continue;
    }
    let caps = PROCFILE_LINE.captures(trimmed).ok_or_else(|| ProcfileError::Format {
      line: line.to_string(),
    })?;
    let name = caps[1].trim_end();
    if !PROCESS_NAME.is_match(name) {
      return Err(ProcfileError::Format { line: line.to_string() });
    }
    processes.push(Process {
      name: name.to_string(),
      command: shell_quote(&caps[2]),
    });
  }
  Ok(processes)
}

/// Quote `s` as a single shell word.
pub fn shell_quote(s: &str) -> String {
  let safe = |c: char| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c);
  if !s.is_empty() && s.chars().all(safe) {
    return s.to_string();
  }
  format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn render_entrypoint(processes: &[Process]) -> String {
  let mut script = String::from(
    "#! /bin/bash\n\
     \n\
     cd /app\n\
     if [ -d .profile.d ]; then\n\
     \x20 for f in .profile.d/*.sh; do\n\
     \x20   [ -f \"$f\" ] && . \"$f\"\n\
     \x20 done\n\
     fi\n\
     \n\
     case \"$1\" in\n",
  );

  for process in processes {
    let _ = writeln!(script, "  {}) exec /bin/bash -c {} ;;", process.name, process.command);
  }

  let names: Vec<&str> = processes.iter().map(|p| p.name.as_str()).collect();
  let _ = write!(
    script,
    "  *)\n    echo \"unknown process: $1\" >&2\n    echo \"available processes: {}\" >&2\n    exit 1\n    ;;\nesac\n",
    names.join(" ")
  );
  script
}

/// Parse `app_dir/Procfile` and write an executable `app_dir/entrypoint`.
///
/// Returns the entrypoint path.
pub fn write_entrypoint(app_dir: &Path) -> Result<PathBuf, ProcfileError> {
  let procfile = app_dir.join(PROCFILE_FILENAME);
  let content = match std::fs::read_to_string(&procfile) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ProcfileError::Missing { path: procfile }),
    Err(source) => {
      return Err(ProcfileError::Io {
        action: "read",
        path: procfile,
        source,
      });
    }
  };

  let processes = parse_procfile(&content)?;
  let path = app_dir.join(ENTRYPOINT_FILENAME);
  std::fs::write(&path, render_entrypoint(&processes)).map_err(|source| ProcfileError::Io {
    action: "write",
    path: path.clone(),
    source,
  })?;
  make_executable(&path)?;

  debug!(path = %path.display(), processes = processes.len(), "wrote entrypoint");
  Ok(path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ProcfileError> {
  use std::os::unix::fs::PermissionsExt;
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).map_err(|source| ProcfileError::Io {
    action: "chmod",
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ProcfileError> {
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn parses_web_process_and_skips_blank_lines() {
    let processes = parse_procfile("web: node server.js\n\n").unwrap();
    assert_eq!(
      processes,
      vec![Process {
        name: "web".to_string(),
        command: "'node server.js'".to_string(),
      }]
    );
  }

  #[test]
  fn colon_is_optional_and_comments_are_skipped() {
    let processes = parse_procfile("# processes\nworker   bin/worker\n").unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].name, "worker");
    assert_eq!(processes[0].command, "bin/worker");
  }

  #[test]
  fn bogus_line_is_a_format_error() {
    let err = parse_procfile("bogus-line\n").unwrap_err();
    assert!(matches!(err, ProcfileError::Format { ref line } if line == "bogus-line"));
  }

  #[test]
  fn names_that_are_not_plain_words_are_rejected() {
    for line in ["my proc: cmd", "web|worker: node server.js", "a)b: run"] {
      let err = parse_procfile(line).unwrap_err();
      assert!(matches!(err, ProcfileError::Format { line: ref l } if l == line), "{line} should be rejected");
    }
    assert_eq!(parse_procfile("release.v2_x: bin/release\n").unwrap()[0].name, "release.v2_x");
  }

  #[test]
  fn quoting() {
    assert_eq!(shell_quote("server.js"), "server.js");
    assert_eq!(shell_quote("echo it's"), r"'echo it'\''s'");
    assert_eq!(shell_quote(""), "''");
  }

  #[test]
  fn entrypoint_dispatches_on_first_argument() {
    let script = render_entrypoint(&parse_procfile("web: node server.js\nwrite-docs: node docs.js\n").unwrap());
    assert!(script.starts_with("#! /bin/bash\n"));
    assert!(script.contains("  web) exec /bin/bash -c 'node server.js' ;;\n"));
    assert!(script.contains("  write-docs) exec /bin/bash -c 'node docs.js' ;;\n"));
    assert!(script.contains("available processes: web write-docs"));
    assert!(script.ends_with("esac\n"));
  }

  #[test]
  fn missing_procfile_is_reported() {
    let temp = TempDir::new().unwrap();
    let err = write_entrypoint(temp.path()).unwrap_err();
    assert!(err.to_string().starts_with("no such file"));
  }

  #[cfg(unix)]
  #[test]
  fn written_entrypoint_is_executable() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("Procfile"), "web: node server.js\n").unwrap();
    let path = write_entrypoint(temp.path()).unwrap();

    assert_eq!(path, temp.path().join("entrypoint"));
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111);
  }
}
