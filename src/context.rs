//! Everything graph assembly needs to know about the current invocation:
//! the active strategy, platform defaults, roots and environment.  Passed
//! explicitly to every component that needs it.

use crate::part::{name_matches, LibType, Part, PartDescriptor, PartSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The strategy/configuration resolver.
pub trait Strategy: Send + Sync {
    /// Identifies the strategy and all of its settings.  Any change
    /// invalidates a cached graph.
    fn fingerprint(&self) -> String;

    /// Files the strategy was read from.
    fn config_files(&self) -> Vec<PathBuf>;

    fn is_excluded(&self, part: &Part) -> bool;

    /// Toolchain parts every build needs before anything else.
    fn bootstrap_parts(&self) -> Vec<PartDescriptor> {
        Vec::new()
    }

    /// Auxiliary tool parts the strategy asks for.
    fn tool_parts(&self) -> Vec<PartDescriptor> {
        Vec::new()
    }
}

/// A strategy described by plain data.
#[derive(Debug, Clone, Default)]
pub struct BasicStrategy {
    pub name: String,
    pub files: Vec<PathBuf>,
    /// Part name patterns excluded from the build.
    pub exclude: Vec<String>,
    pub bootstrap: Vec<PartDescriptor>,
    pub tools: Vec<PartDescriptor>,
}

impl Strategy for BasicStrategy {
    fn fingerprint(&self) -> String {
        let list = |descs: &[PartDescriptor]| {
            descs
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "{};exclude={};bootstrap={};tools={}",
            self.name,
            self.exclude.join(","),
            list(&self.bootstrap),
            list(&self.tools)
        )
    }

    fn config_files(&self) -> Vec<PathBuf> {
        self.files.clone()
    }

    fn is_excluded(&self, part: &Part) -> bool {
        self.exclude
            .iter()
            .any(|pattern| name_matches(&part.spec.name, pattern))
    }

    fn bootstrap_parts(&self) -> Vec<PartDescriptor> {
        self.bootstrap.clone()
    }

    fn tool_parts(&self) -> Vec<PartDescriptor> {
        self.tools.clone()
    }
}

pub fn host_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

pub struct BuildContext {
    pub strategy: Box<dyn Strategy>,
    /// Defaults for the root part; sub-parts inherit from their parent.
    pub context: String,
    pub repo: String,
    pub platform: String,
    pub lib_type: LibType,
    pub host: String,
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub tool_version: String,
    /// Files making up the tool itself; if any is newer than a cached
    /// graph, the graph is rebuilt.
    pub tool_files: Vec<PathBuf>,
    /// Snapshot of the environment variables that affect the graph.
    pub env: BTreeMap<String, String>,
    /// Tolerate a part listing the same sub-part twice.
    pub allow_duplicate_subparts: bool,
}

impl BuildContext {
    pub fn new(
        strategy: Box<dyn Strategy>,
        source_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        BuildContext {
            strategy,
            context: "main".into(),
            repo: "main".into(),
            platform: host_platform(),
            lib_type: LibType::Dynamic,
            host: host_platform(),
            source_root: source_root.into(),
            output_root: output_root.into(),
            tool_version: env!("CARGO_PKG_VERSION").into(),
            tool_files: Vec::new(),
            env: BTreeMap::new(),
            allow_duplicate_subparts: false,
        }
    }

    /// Record the current value of each named variable that is set.
    pub fn capture_env<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            let name = name.as_ref();
            if let Ok(val) = std::env::var(name) {
                self.env.insert(name.to_string(), val);
            }
        }
    }

    /// Resolve the root descriptor against the invocation's defaults.
    pub fn root_spec(&self, root: &PartDescriptor) -> PartSpec {
        let defaults = PartSpec {
            name: String::new(),
            context: self.context.clone(),
            repo: self.repo.clone(),
            platform: self.platform.clone(),
            lib_type: self.lib_type,
        };
        root.resolve(&defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_exclusion_and_fingerprint() {
        let strategy = BasicStrategy {
            name: "ci".into(),
            exclude: vec!["Docs*".into()],
            tools: vec![PartDescriptor::named("Compiler")],
            ..Default::default()
        };
        let ctx = BuildContext::new(Box::new(strategy.clone()), "src", "out");
        let docs = Part::new(ctx.root_spec(&PartDescriptor::named("DocsHtml")), "p");
        let lib = Part::new(ctx.root_spec(&PartDescriptor::named("Lib")), "p");
        assert!(ctx.strategy.is_excluded(&docs));
        assert!(!ctx.strategy.is_excluded(&lib));

        let mut other = strategy.clone();
        other.tools.clear();
        assert_ne!(strategy.fingerprint(), other.fingerprint());
    }

    #[test]
    fn root_spec_uses_defaults() {
        let mut ctx = BuildContext::new(Box::<BasicStrategy>::default(), "src", "out");
        ctx.platform = "x64".into();
        let spec = ctx.root_spec(&PartDescriptor::parse("Geometry:Solids").unwrap());
        assert_eq!(spec.key(), "solids*geometry*x64*dyn");
        assert_eq!(spec.repo, "main");
    }
}
