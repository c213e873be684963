//! Runs part commands through the platform shell.

use crate::action::PartRunner;
use crate::error::{Error, Result};
use crate::part::Part;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, PartialEq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

#[cfg(unix)]
fn shell(cmdline: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell(cmdline: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(cmdline);
    cmd
}

#[cfg(unix)]
fn termination(status: std::process::ExitStatus, output: &mut Vec<u8>) -> Termination {
    use std::os::unix::process::ExitStatusExt;
    if status.success() {
        return Termination::Success;
    }
    match status.signal() {
        // SIGINT
        Some(2) => {
            output.extend_from_slice(b"interrupted");
            Termination::Interrupted
        }
        Some(sig) => {
            output.extend_from_slice(format!("signal {}", sig).as_bytes());
            Termination::Failure
        }
        None => Termination::Failure,
    }
}

#[cfg(windows)]
fn termination(status: std::process::ExitStatus, _output: &mut Vec<u8>) -> Termination {
    if status.success() {
        Termination::Success
    } else {
        Termination::Failure
    }
}

/// Run `cmdline` in `dir`, returning how it ended and its combined stdout
/// and stderr.
pub fn run_command(
    cmdline: &str,
    dir: &Path,
    env: &[(&str, &str)],
) -> std::io::Result<(Termination, Vec<u8>)> {
    let mut cmd = shell(cmdline);
    cmd.current_dir(dir).stdin(Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }
    let out = cmd.output()?;
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    let termination = termination(out.status, &mut output);
    Ok((termination, output))
}

/// Runs each part's `command` to build and `clean` to clean, from the
/// source root.  Parts without the relevant command succeed trivially.
pub struct ShellRunner {
    source_root: PathBuf,
    output_root: PathBuf,
}

impl ShellRunner {
    pub fn new(source_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        ShellRunner {
            source_root: source_root.into(),
            output_root: output_root.into(),
        }
    }

    fn run(&self, part: &Part, cmdline: Option<&str>) -> Result<String> {
        let Some(cmdline) = cmdline else {
            return Ok(String::new());
        };
        let spec = &part.spec;
        let out_dir = self.output_root.to_string_lossy();
        let env = [
            ("PARTBUILD_PART", spec.name.as_str()),
            ("PARTBUILD_CONTEXT", spec.context.as_str()),
            ("PARTBUILD_PLATFORM", spec.platform.as_str()),
            ("PARTBUILD_LIB_TYPE", spec.lib_type.short()),
            ("PARTBUILD_OUT", &*out_dir),
        ];
        let (termination, output) = run_command(cmdline, &self.source_root, &env)
            .map_err(|err| Error::part_build(part.key(), format!("{}: {}", cmdline, err)))?;
        let output = String::from_utf8_lossy(&output).into_owned();
        match termination {
            Termination::Success => Ok(output),
            Termination::Interrupted => Err(Error::part_build(part.key(), "interrupted")),
            Termination::Failure => Err(Error::part_build(
                part.key(),
                format!("command failed: {}\n{}", cmdline, output),
            )),
        }
    }
}

impl PartRunner for ShellRunner {
    fn build(&self, part: &Part) -> Result<String> {
        self.run(part, part.command.as_deref())
    }

    fn clean(&self, part: &Part) -> Result<String> {
        self.run(part, part.clean.as_deref())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::part::{LibType, PartSpec};

    fn part(command: &str) -> Part {
        let spec = PartSpec {
            name: "Lib".into(),
            context: "main".into(),
            repo: "main".into(),
            platform: "x64".into(),
            lib_type: LibType::Static,
        };
        let mut part = Part::new(spec, "parts.toml");
        part.command = Some(command.into());
        part
    }

    #[test]
    fn runs_in_source_root() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ShellRunner::new(dir.path(), "out");
        let out = runner.build(&part("echo $PARTBUILD_PART $PARTBUILD_LIB_TYPE > built; cat built"))?;
        assert_eq!(out, "Lib stat\n");
        assert!(dir.path().join("built").exists());
        // No clean command.
        assert_eq!(runner.clean(&part("true"))?, "");
        Ok(())
    }

    #[test]
    fn failure_carries_output() {
        let runner = ShellRunner::new(".", "out");
        let err = runner.build(&part("echo oops >&2; exit 3")).unwrap_err();
        assert!(matches!(&err, Error::PartBuild { part, .. } if part == "lib*main*x64*stat"));
        assert!(err.to_string().contains("oops"));
    }
}
