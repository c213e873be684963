use anyhow::anyhow;
use argh::FromArgs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    action::{ActionKind, ActionSettings, StandardAction},
    cache,
    config::Config,
    context::BuildContext,
    fs::RealFileSystem,
    manifest::{Manifest, DEFAULT_MANIFEST},
    part::PartDescriptor,
    process::ShellRunner,
    progress::ConsoleProgress,
    repo::LocalRepositories,
    retry::{ConsolePrompter, RetryController},
    sched::LeafScheduler,
};

#[derive(FromArgs)]
/// Build a tree of parts, in parallel.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<PathBuf>,

    /// parts manifest [default=parts.toml]
    #[argh(option, short = 'f', default = "PathBuf::from(DEFAULT_MANIFEST)")]
    manifest: PathBuf,

    /// output directory [default=out, next to the manifest]
    #[argh(option, short = 'o')]
    out: Option<PathBuf>,

    /// part to build instead of the manifest's root, as context:name
    #[argh(option)]
    root: Option<String>,

    /// worker threads; 0 builds one part at a time on the main thread
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// keep building unrelated parts after a failure
    #[argh(switch, short = 'k')]
    keep_going: bool,

    /// ask whether to retry when parts fail
    #[argh(switch)]
    prompt: bool,

    /// ignore and replace the saved graph
    #[argh(switch)]
    no_cache: bool,

    /// act on the root part only
    #[argh(switch)]
    no_sub_parts: bool,

    /// print commands and debug logging
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Build(BuildCmd),
    Rebuild(RebuildCmd),
    Clean(CleanCmd),
    Parts(PartsCmd),
    Repos(ReposCmd),
    Provenance(ProvenanceCmd),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "build")]
/// build every part below the root
struct BuildCmd {}

#[derive(FromArgs)]
#[argh(subcommand, name = "rebuild")]
/// clean and build the matching parts and their sub-parts
struct RebuildCmd {
    /// part name patterns; * and ? are wildcards
    #[argh(positional)]
    patterns: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "clean")]
/// clean every part below the root
struct CleanCmd {}

#[derive(FromArgs)]
#[argh(subcommand, name = "parts")]
/// list parts in build order
struct PartsCmd {}

#[derive(FromArgs)]
#[argh(subcommand, name = "repos")]
/// pull every repository the parts come from
struct ReposCmd {}

#[derive(FromArgs)]
#[argh(subcommand, name = "provenance")]
/// show where each part's source came from
struct ProvenanceCmd {}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("partbuild=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("partbuild=warn"))
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn run_impl(args: Args) -> anyhow::Result<i32> {
    if let Some(dir) = &args.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let manifest_path = absolute(&args.manifest)?;
    let manifest = Manifest::load(&manifest_path)?;
    let config = Config::from_env(args.jobs, &manifest.settings)?;

    let source_root = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("no directory for {:?}", manifest_path))?;
    let output_root = match &args.out {
        Some(out) => absolute(out)?,
        None => source_root.join("out"),
    };
    std::fs::create_dir_all(&output_root)
        .map_err(|err| anyhow!("create {:?}: {}", output_root, err))?;

    let mut ctx = BuildContext::new(
        Box::new(manifest.strategy.clone()),
        &source_root,
        &output_root,
    );
    if let Some(platform) = &manifest.platform {
        ctx.platform = platform.clone();
    }
    if let Some(lib_type) = manifest.lib_type {
        ctx.lib_type = lib_type;
    }
    ctx.capture_env(&manifest.env);
    ctx.allow_duplicate_subparts = config.allow_duplicate_subparts;
    if let Ok(exe) = std::env::current_exe() {
        ctx.tool_files.push(exe);
    }

    let root = match &args.root {
        Some(root) => PartDescriptor::parse(root)?,
        None => manifest.root.clone(),
    };
    let snapshot = (!args.no_cache).then(|| cache::snapshot_path(&ctx));
    let graph = cache::load_or_build(
        &ctx,
        &manifest,
        &RealFileSystem::new(),
        &root,
        snapshot.as_deref(),
    )?;

    let kind = match args.command {
        Command::Build(_) => ActionKind::Build,
        Command::Rebuild(cmd) => {
            if cmd.patterns.is_empty() {
                anyhow::bail!("rebuild needs at least one part name");
            }
            ActionKind::Rebuild {
                patterns: cmd.patterns,
            }
        }
        Command::Clean(_) => ActionKind::Clean,
        Command::Parts(_) => ActionKind::PartWalk,
        Command::Repos(_) => ActionKind::RepoWalk,
        Command::Provenance(_) => ActionKind::Provenance,
    };
    let settings = ActionSettings {
        threads: config.threads,
        pause: config.pause,
        prompt_on_error: args.prompt,
        ignore_errors: args.keep_going,
        no_sub_parts: args.no_sub_parts,
    };
    let runner = ShellRunner::new(&source_root, &output_root);
    let repos = LocalRepositories::new(&source_root, ctx.repo.as_str()).ignoring(&output_root);
    let action = StandardAction::new(kind, settings, &runner, &repos);

    let mut progress = ConsoleProgress::new(args.verbose);
    let mut prompter = ConsolePrompter::stdin();
    let mut sched = LeafScheduler::new(&graph);
    let outcome = RetryController::new(&graph, &action, &mut progress, &mut prompter)
        .stall_timeout(config.stall_timeout)
        .run(&mut sched)?;
    Ok(if outcome.success() { 0 } else { 1 })
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);
    run_impl(args)
}
