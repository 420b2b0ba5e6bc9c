//! External command execution.
//!
//! Every external tool the daemon shells out to (partition dump, filesystem
//! checkers, formatters, ownership fix-up) goes through these helpers. Calls
//! are synchronous; the caller already holds the manager lock, so there is
//! nothing to overlap them with.

use std::ffi::OsStr;
use std::process::{Command, Output, Stdio};

use crate::error::{CommandExitSnafu, Error, IoResultExt, Result};

fn command_name(program: &OsStr) -> String {
    program.to_string_lossy().into_owned()
}

/// Runs a command and captures its output without judging the exit status.
pub fn run(program: impl AsRef<OsStr>, args: &[&OsStr]) -> Result<Output> {
    let program = program.as_ref();
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .command_context(command_name(program))
}

/// Runs a command, requiring exit status zero.
pub fn run_checked(program: impl AsRef<OsStr>, args: &[&OsStr]) -> Result<()> {
    run_tolerant(program, args, &[0])
}

/// Runs a command, accepting any of `ok_codes` as success.
///
/// fsck-style tools use nonzero exit codes for "errors found and corrected",
/// which callers often want to treat as a pass.
pub fn run_tolerant(program: impl AsRef<OsStr>, args: &[&OsStr], ok_codes: &[i32]) -> Result<()> {
    let program = program.as_ref();
    let output = run(program, args)?;
    let code = output.status.code().unwrap_or(-1);
    if !ok_codes.contains(&code) {
        return Err(Error::CommandExit {
            command: command_name(program),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Runs a command and returns its stdout split into lines.
///
/// A nonzero exit is an error even if the tool produced output.
pub fn run_for_lines(program: impl AsRef<OsStr>, args: &[&OsStr]) -> Result<Vec<String>> {
    let program = program.as_ref();
    let output = run(program, args)?;
    if !output.status.success() {
        return CommandExitSnafu {
            command: command_name(program),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .fail();
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_run_for_lines_captures_stdout() {
        let argv = args(&["line one\nline two"]);
        let argv: Vec<&OsStr> = argv.iter().map(OsString::as_os_str).collect();
        let lines = run_for_lines("echo", &argv).unwrap();
        assert_eq!(lines, vec!["line one", "line two"]);
    }

    #[test]
    fn test_missing_program_is_execution_error() {
        let err = run_checked("/nonexistent/tool-xyz", &[]).unwrap_err();
        assert!(matches!(err, Error::CommandExecution { .. }));
    }

    #[test]
    fn test_run_tolerant_accepts_listed_codes() {
        let argv = args(&["-c", "exit 1"]);
        let argv: Vec<&OsStr> = argv.iter().map(OsString::as_os_str).collect();
        assert!(run_tolerant("sh", &argv, &[0, 1]).is_ok());
        assert!(matches!(
            run_tolerant("sh", &argv, &[0]).unwrap_err(),
            Error::CommandExit { code: 1, .. }
        ));
    }
}
