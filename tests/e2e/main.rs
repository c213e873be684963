//! Support code for e2e tests, which run partbuild as a binary.

mod basic;
mod failures;
mod snapshot;

pub fn partbuild_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("partbuild")
}

pub fn partbuild_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(partbuild_binary());
    cmd.args(args);
    // Keep the environment from leaking into the scheduling policy.
    cmd.env_remove("PARTBUILD_THREADS")
        .env_remove("PARTBUILD_PAUSE_MS")
        .env_remove("PARTBUILD_ALLOW_DUPLICATE_SUBPARTS")
        .env_remove("RUST_LOG");
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", std::str::from_utf8(&out.stdout).unwrap());
    print!("{}", std::str::from_utf8(&out.stderr).unwrap());
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if out.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// Manages a temporary directory for invoking partbuild.
pub struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn read_string(&self, path: &str) -> anyhow::Result<String> {
        Ok(String::from_utf8(self.read(path)?)?)
    }

    /// Invoke partbuild, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}

/// A part that appends its own name to `order.txt` when built.
#[cfg(unix)]
pub fn logging_part(name: &str, sub_parts: &[&str]) -> String {
    let subs: Vec<String> = sub_parts.iter().map(|s| format!("{:?}", s)).collect();
    format!(
        "[[part]]\nname = {:?}\nsub_parts = [{}]\ncommand = \"echo {} >> order.txt\"\nclean = \"rm -f order.txt\"\n",
        name,
        subs.join(", "),
        name
    )
}
