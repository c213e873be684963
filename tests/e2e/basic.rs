use crate::*;

#[cfg(unix)]
#[test]
fn builds_sub_parts_first() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        &[
            logging_part("App", &["Lib"]),
            logging_part("Lib", &["Base"]),
            logging_part("Base", &[]),
        ]
        .join("\n"),
    )?;
    let out = space.run_expect(&mut partbuild_command(vec!["-j", "2", "build"]))?;
    assert_output_contains(&out, "partbuild: 3 of 3 parts done");
    assert_eq!(space.read_string("order.txt")?, "Base\nLib\nApp\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn sequential_sub_parts() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        &[
            "[[part]]\nname = \"App\"\nsub_parts = [\"X\", \"Y\", \"Z\"]\nsequential = true\n"
                .to_string(),
            logging_part("X", &[]),
            logging_part("Y", &[]),
            logging_part("Z", &[]),
        ]
        .join("\n"),
    )?;
    space.run_expect(&mut partbuild_command(vec!["-j", "8", "build"]))?;
    assert_eq!(space.read_string("order.txt")?, "X\nY\nZ\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn no_threads_builds_in_place() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        &[logging_part("App", &["Lib"]), logging_part("Lib", &[])].join("\n"),
    )?;
    let out = space.run_expect(&mut partbuild_command(vec!["-j", "0", "build"]))?;
    assert_output_contains(&out, "partbuild: 2 of 2 parts done");
    assert_eq!(space.read_string("order.txt")?, "Lib\nApp\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn part_sees_its_environment() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        r#"
[strategy]
platform = "x64"
lib_type = "static"

[[part]]
name = "App"
command = "echo $PARTBUILD_PART $PARTBUILD_PLATFORM $PARTBUILD_LIB_TYPE"
"#,
    )?;
    let out = space.run_expect(&mut partbuild_command(vec!["build"]))?;
    assert_output_contains(&out, "App x64 stat");
    Ok(())
}

#[test]
fn lists_parts() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        r#"
[strategy]
platform = "x64"
lib_type = "dynamic"
exclude = ["Docs"]

[[part]]
name = "App"
sub_parts = ["Lib", "Docs"]

[[part]]
name = "Lib"

[[part]]
name = "Docs"
"#,
    )?;
    let out = space.run_expect(&mut partbuild_command(vec!["parts"]))?;
    assert_output_contains(&out, "lib*main*x64*dyn");
    assert_output_contains(&out, "app*main*x64*dyn");
    assert_output_not_contains(&out, "docs*");
    Ok(())
}

#[cfg(unix)]
#[test]
fn rebuild_matching_parts() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "parts.toml",
        &[
            logging_part("App", &["Lib", "Tool"]),
            logging_part("Lib", &[]),
            logging_part("Tool", &[]),
        ]
        .join("\n"),
    )?;
    space.run_expect(&mut partbuild_command(vec!["build"]))?;

    // Cleaning Lib removes the log, then only Lib builds again.
    space.run_expect(&mut partbuild_command(vec!["rebuild", "li*"]))?;
    assert_eq!(space.read_string("order.txt")?, "Lib\n");

    let out = space.run(&mut partbuild_command(vec!["rebuild", "nothing"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "no parts match nothing");
    Ok(())
}
