//! Parts: the buildable units the graph is made of, and the descriptors that
//! refer to them from other parts.

use crate::error::Error;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibType {
    Dynamic,
    Static,
}

impl LibType {
    pub fn short(&self) -> &'static str {
        match self {
            LibType::Dynamic => "dyn",
            LibType::Static => "stat",
        }
    }

    pub fn parse(s: &str) -> Option<LibType> {
        match s.to_ascii_lowercase().as_str() {
            "dynamic" | "dyn" => Some(LibType::Dynamic),
            "static" | "stat" => Some(LibType::Static),
            _ => None,
        }
    }
}

impl std::fmt::Display for LibType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LibType::Dynamic => "dynamic",
            LibType::Static => "static",
        })
    }
}

/// The library type a sub-part reference asks for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum LibChoice {
    /// Follow whatever the referencing part builds as.
    #[default]
    Parent,
    Static,
    Dynamic,
}

/// A reference to a part, as written in another part's sub-part list.
/// Anything left unspecified is inherited from the referencing part.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PartDescriptor {
    pub name: String,
    /// Build context (part file) holding the definition.
    pub context: Option<String>,
    pub repo: Option<String>,
    pub platform: Option<String>,
    pub lib_type: LibChoice,
}

impl PartDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        PartDescriptor {
            name: name.into(),
            context: None,
            repo: None,
            platform: None,
            lib_type: LibChoice::Parent,
        }
    }

    /// Parse `context:name` or a bare `name`.  Everything up to the last
    /// colon is the context.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (context, name) = match s.rfind(':') {
            Some(pos) => (s[..pos].trim(), s[pos + 1..].trim()),
            None => ("", s.trim()),
        };
        if name.is_empty() {
            return Err(Error::build(format!("no part name in descriptor {:?}", s)));
        }
        let mut desc = PartDescriptor::named(name);
        if !context.is_empty() {
            desc.context = Some(context.to_string());
        }
        Ok(desc)
    }

    /// Fill in everything unspecified from the referencing part.
    pub fn resolve(&self, parent: &PartSpec) -> PartSpec {
        PartSpec {
            name: self.name.clone(),
            context: self.context.clone().unwrap_or_else(|| parent.context.clone()),
            repo: self.repo.clone().unwrap_or_else(|| parent.repo.clone()),
            platform: self
                .platform
                .clone()
                .unwrap_or_else(|| parent.platform.clone()),
            lib_type: match self.lib_type {
                LibChoice::Parent => parent.lib_type,
                LibChoice::Static => LibType::Static,
                LibChoice::Dynamic => LibType::Dynamic,
            },
        }
    }
}

impl std::fmt::Display for PartDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}:{}", context, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A fully-qualified part instance: one part built for one platform and
/// library type.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PartSpec {
    pub name: String,
    pub context: String,
    pub repo: String,
    pub platform: String,
    pub lib_type: LibType,
}

impl PartSpec {
    /// The node identifier.  The repository is deliberately not part of it:
    /// the same part reached through two repositories is one node.
    pub fn key(&self) -> String {
        [
            self.name.as_str(),
            self.context.as_str(),
            self.platform.as_str(),
            self.lib_type.short(),
        ]
        .join("*")
        .to_lowercase()
    }
}

impl std::fmt::Display for PartSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} <{} {}>",
            self.context, self.name, self.platform, self.lib_type
        )
    }
}

/// A part definition as produced by a `PartReader`.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub spec: PartSpec,
    /// The file the definition was read from.
    pub source: PathBuf,
    pub sub_parts: Vec<PartDescriptor>,
    /// Sub-parts must build one after another, in declaration order.
    pub sequential: bool,
    /// Scheduled in the high-priority phase.
    pub early: bool,
    /// Aspects this part provides.
    pub aspects: Vec<String>,
    /// This part depends on every part providing these aspects.
    pub requires_aspects: Vec<String>,
    pub exclude_platforms: Vec<String>,
    pub exclude_lib_types: Vec<LibType>,
    pub command: Option<String>,
    pub clean: Option<String>,
}

impl Part {
    pub fn new(spec: PartSpec, source: impl Into<PathBuf>) -> Self {
        Part {
            spec,
            source: source.into(),
            sub_parts: Vec::new(),
            sequential: false,
            early: false,
            aspects: Vec::new(),
            requires_aspects: Vec::new(),
            exclude_platforms: Vec::new(),
            exclude_lib_types: Vec::new(),
            command: None,
            clean: None,
        }
    }

    pub fn key(&self) -> String {
        self.spec.key()
    }

    /// Why this part cannot be built for its own platform and library type.
    pub fn exclusion(&self) -> Option<String> {
        if self
            .exclude_platforms
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&self.spec.platform))
        {
            return Some(format!("platform {} excluded", self.spec.platform));
        }
        if self.exclude_lib_types.contains(&self.spec.lib_type) {
            return Some(format!("{} build excluded", self.spec.lib_type));
        }
        None
    }
}

/// Case-insensitive name match; `*` and `?` are wildcards.
pub fn name_matches(name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains(['*', '?']) {
        return name.eq_ignore_ascii_case(pattern);
    }
    let name: Vec<char> = name.to_lowercase().chars().collect();
    let pat: Vec<char> = pattern.to_lowercase().chars().collect();
    let (mut n, mut p) = (0, 0);
    // Position of the last '*' seen, and where in `name` it started matching.
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == name[n]) {
            n += 1;
            p += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    pat[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PartSpec {
        PartSpec {
            name: "Root".into(),
            context: "Main".into(),
            repo: "mainrepo".into(),
            platform: "x64".into(),
            lib_type: LibType::Dynamic,
        }
    }

    #[test]
    fn parse_descriptor() {
        let d = PartDescriptor::parse("Geometry:Solids").unwrap();
        assert_eq!(d.context.as_deref(), Some("Geometry"));
        assert_eq!(d.name, "Solids");

        let d = PartDescriptor::parse(" Solids ").unwrap();
        assert_eq!(d.context, None);
        assert_eq!(d.name, "Solids");

        let d = PartDescriptor::parse("a:b:c").unwrap();
        assert_eq!(d.context.as_deref(), Some("a:b"));
        assert_eq!(d.to_string(), "a:b:c");

        assert!(PartDescriptor::parse("Geometry:").is_err());
    }

    #[test]
    fn resolve_inherits_from_parent() {
        let mut d = PartDescriptor::named("Lib");
        let s = d.resolve(&spec());
        assert_eq!(s.context, "Main");
        assert_eq!(s.repo, "mainrepo");
        assert_eq!(s.lib_type, LibType::Dynamic);

        d.lib_type = LibChoice::Static;
        d.platform = Some("arm64".into());
        let s = d.resolve(&spec());
        assert_eq!(s.lib_type, LibType::Static);
        assert_eq!(s.key(), "lib*main*arm64*stat");
    }

    #[test]
    fn exclusions() {
        let mut p = Part::new(spec(), "parts.toml");
        assert_eq!(p.exclusion(), None);
        p.exclude_platforms = vec!["X64".into()];
        assert!(p.exclusion().is_some());
        p.exclude_platforms.clear();
        p.exclude_lib_types = vec![LibType::Dynamic];
        assert_eq!(p.exclusion().as_deref(), Some("dynamic build excluded"));
    }

    #[test]
    fn wildcards() {
        assert!(name_matches("anything", "*"));
        assert!(name_matches("GeomLib", "geomlib"));
        assert!(!name_matches("GeomLib", "geom"));
        assert!(name_matches("GeomLib", "geom*"));
        assert!(name_matches("GeomLib", "*lib"));
        assert!(name_matches("GeomLib", "g?oml*b"));
        assert!(!name_matches("GeomLib", "g?oml*x"));
        assert!(name_matches("aXbXc", "a*b*c"));
    }
}
