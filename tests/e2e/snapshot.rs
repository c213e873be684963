use crate::*;

const PARTS: &str = r#"
[[part]]
name = "App"
sub_parts = ["Lib"]

[[part]]
name = "Lib"
"#;

#[test]
fn graph_is_saved_and_reused() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("parts.toml", PARTS)?;
    space.run_expect(&mut partbuild_command(vec!["parts"]))?;
    assert!(space.read("out/.partbuild_graph").is_ok());

    let mut cmd = partbuild_command(vec!["-v", "parts"]);
    let out = space.run_expect(&mut cmd)?;
    let log = std::str::from_utf8(&out.stderr)?;
    assert!(log.contains("reusing saved graph"), "{}", log);
    Ok(())
}

#[test]
fn edited_manifest_rebuilds_graph() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("parts.toml", PARTS)?;
    space.run_expect(&mut partbuild_command(vec!["parts"]))?;

    space.write(
        "parts.toml",
        &format!("{}\n[[part]]\nname = \"Extra\"\n", PARTS.replace("[\"Lib\"]", "[\"Lib\", \"Extra\"]")),
    )?;
    // Make sure the edit is visible even on coarse-grained file systems.
    let later = filetime::FileTime::from_unix_time(4_000_000_000, 0);
    filetime::set_file_mtime(space.path().join("parts.toml"), later)?;

    let out = space.run_expect(&mut partbuild_command(vec!["parts"]))?;
    assert_output_contains(&out, "extra*main*");
    assert_output_contains(&out, "3 of 3 parts done");
    Ok(())
}

#[test]
fn no_cache_ignores_snapshot() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("parts.toml", PARTS)?;
    std::fs::create_dir_all(space.path().join("out"))?;
    space.write("out/.partbuild_graph", "garbage")?;
    let out = space.run_expect(&mut partbuild_command(vec!["--no-cache", "parts"]))?;
    assert_output_contains(&out, "2 of 2 parts done");
    assert_eq!(space.read("out/.partbuild_graph")?, b"garbage");
    Ok(())
}
