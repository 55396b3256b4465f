//! External command execution.

use crate::error::{Error, Result};
use log::debug;
use std::io::Write;
use std::process::{Command, Output, Stdio};

/// Run a command and capture stdout
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    debug!("running {cmd} {}", args.join(" "));
    let output = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|e| spawn_error(cmd, args, &e))?;
    checked(cmd, &output)
}

/// Run a command with `input` on stdin and capture stdout
pub fn run_with_input(cmd: &str, args: &[&str], input: &[u8]) -> Result<String> {
    debug!("running {cmd} {} (with stdin)", args.join(" "));
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(cmd, args, &e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    let output = child.wait_with_output()?;
    checked(cmd, &output)
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn checked(cmd: &str, output: &Output) -> Result<String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(Error::CommandFailed {
            message: format!("{cmd} exited with {}", output.status),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn spawn_error(cmd: &str, args: &[&str], err: &std::io::Error) -> Error {
    Error::CommandFailed {
        message: format!("failed to execute: {cmd} {}: {err}", args.join(" ")),
        stderr: String::new(),
    }
}
