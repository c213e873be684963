use crate::*;

#[cfg(unix)]
#[test]
fn failed_part_stops_the_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        r#"
[[part]]
name = "App"
sub_parts = ["Lib"]
command = "touch app.built"

[[part]]
name = "Lib"
command = "echo cannot build lib; exit 3"
"#,
    )?;
    let out = space.run(&mut partbuild_command(vec!["build"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: main:Lib");
    assert_output_contains(&out, "cannot build lib");
    assert_output_contains(&out, "0 of 2 parts done, 1 failed");
    assert!(space.read("app.built").is_err());
    Ok(())
}

#[cfg(unix)]
#[test]
fn keep_going_builds_unrelated_parts() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        r#"
[[part]]
name = "App"
sub_parts = ["Bad", "Good"]
command = "touch app.built"

[[part]]
name = "Bad"
command = "exit 1"

[[part]]
name = "Good"
command = "touch good.built"
"#,
    )?;
    let out = space.run(&mut partbuild_command(vec!["-j", "1", "-k", "build"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "1 of 3 parts done, 1 failed");
    assert!(space.read("good.built").is_ok());
    assert!(space.read("app.built").is_err());
    Ok(())
}

#[cfg(unix)]
#[test]
fn prompt_retries_on_request() -> anyhow::Result<()> {
    use std::io::Write;

    let space = TestSpace::new()?;
    // Fails the first time only.
    space.write(
        "parts.toml",
        r#"
[[part]]
name = "App"
sub_parts = ["Flaky"]
command = "touch app.built"

[[part]]
name = "Flaky"
command = "if [ -e tried ]; then true; else touch tried; exit 1; fi"
"#,
    )?;
    let mut cmd = partbuild_command(vec!["--prompt", "build"]);
    cmd.current_dir(space.path())
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    let mut child = cmd.spawn()?;
    child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("no stdin"))?
        .write_all(b"r\n")?;
    let out = child.wait_with_output()?;
    assert!(out.status.success());
    assert_output_contains(&out, "[r]etry");
    assert_output_contains(&out, "partbuild: 2 of 2 parts done");
    assert!(space.read("app.built").is_ok());
    Ok(())
}

#[test]
fn missing_part_is_an_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        "[[part]]\nname = \"App\"\nsub_parts = [\"Nowhere\"]\n",
    )?;
    let out = space.run(&mut partbuild_command(vec!["build"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "partbuild: error:");
    assert_output_contains(&out, "no part Nowhere");
    Ok(())
}

#[test]
fn duplicate_sub_parts_need_permission() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        "[[part]]\nname = \"App\"\nsub_parts = [\"Lib\", \"Lib\"]\n\n[[part]]\nname = \"Lib\"\n",
    )?;
    let out = space.run(&mut partbuild_command(vec!["build"]))?;
    assert!(!out.status.success());

    let mut cmd = partbuild_command(vec!["build"]);
    cmd.env("PARTBUILD_ALLOW_DUPLICATE_SUBPARTS", "1");
    let out = space.run_expect(&mut cmd)?;
    assert_output_contains(&out, "partbuild: 2 of 2 parts done");
    Ok(())
}
