//! Package-name substitution.
//!
//! A role asks for abstract package names; each distribution maps some of
//! them to its own names through a [`SubstitutionGraph`]. Substitutes are
//! themselves subject to substitution and the graph may contain cycles.
//!
//! # Examples
//!
//! ```
//! use fleetwright::domain::package::{resolve, Substitute, SubstitutionGraph};
//!
//! let graph = SubstitutionGraph::from_pairs([
//!     ("python-dev", Substitute::one("python3-devel")),
//!     ("htop", Substitute::Nothing),
//! ])
//! .unwrap();
//!
//! let names = resolve(&graph, &["python-dev", "htop", "git"]).unwrap();
//! assert_eq!(names.into_iter().collect::<Vec<_>>(), ["git", "python3-devel"]);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::PackageError;

/// What a package name is replaced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitute {
    /// The package is dropped.
    Nothing,
    /// A single replacement, itself subject to substitution.
    One(String),
    /// Several replacements, each subject to substitution.
    Many(Vec<String>),
}

impl Substitute {
    pub fn one(name: impl Into<String>) -> Self {
        Self::One(name.into())
    }

    pub fn many<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Many(names.into_iter().map(Into::into).collect())
    }

    fn names(&self) -> &[String] {
        match self {
            Self::Nothing => &[],
            Self::One(name) => std::slice::from_ref(name),
            Self::Many(names) => names,
        }
    }
}

/// Immutable mapping from package name to its [`Substitute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionGraph {
    entries: HashMap<String, Substitute>,
}

impl SubstitutionGraph {
    /// An empty graph; every name resolves to itself.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(original, substitute)` pairs.
    ///
    /// When a name appears more than once only the last pair counts.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidPackageName`] if any original or
    /// substitute name is malformed.
    pub fn from_pairs<I, K>(pairs: I) -> Result<Self, PackageError>
    where
        I: IntoIterator<Item = (K, Substitute)>,
        K: Into<String>,
    {
        let mut entries = HashMap::new();
        for (name, substitute) in pairs {
            let name = name.into();
            validate_name(&name)?;
            for replacement in substitute.names() {
                validate_name(replacement)?;
            }
            entries.insert(name, substitute);
        }
        Ok(Self { entries })
    }

    /// Build a graph from a TOML table.
    ///
    /// A string maps to a single substitute, an array of strings to several
    /// and `false` drops the package. Any other value is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidPackageName`] for non-scalar or
    /// malformed entries; nothing is built in that case.
    pub fn from_toml(table: &toml::Table) -> Result<Self, PackageError> {
        let mut pairs = Vec::with_capacity(table.len());
        for (name, value) in table {
            let substitute = match value {
                toml::Value::String(s) => Substitute::One(s.clone()),
                toml::Value::Boolean(false) => Substitute::Nothing,
                toml::Value::Array(items) => {
                    let names = items
                        .iter()
                        .map(|item| match item {
                            toml::Value::String(s) => Ok(s.clone()),
                            other => Err(PackageError::InvalidPackageName(other.to_string())),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Substitute::Many(names)
                }
                other => {
                    return Err(PackageError::InvalidPackageName(format!("{name} = {other}")));
                }
            };
            pairs.push((name.clone(), substitute));
        }
        Self::from_pairs(pairs)
    }

    /// Parse a TOML document whose top-level keys are package names.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidPackageName`] if the document doesn't
    /// parse or holds a malformed entry.
    pub fn from_toml_str(source: &str) -> Result<Self, PackageError> {
        let table: toml::Table = source
            .parse()
            .map_err(|e: toml::de::Error| PackageError::InvalidPackageName(e.message().to_string()))?;
        Self::from_toml(&table)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Substitute> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How visited names are tracked across the top-level names of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VisitedScope {
    /// Every requested name starts with a fresh visited set, so the result
    /// for one name never depends on the others in the batch.
    #[default]
    PerPackage,
    /// One visited set for the whole batch. A name already expanded for an
    /// earlier request resolves to itself. Matches legacy substitution
    /// tables that relied on this.
    Batch,
}

/// Resolves requested package names against a substitution graph.
#[derive(Debug, Clone, Copy)]
pub struct PackageResolver<'g> {
    graph: &'g SubstitutionGraph,
    scope: VisitedScope,
}

impl<'g> PackageResolver<'g> {
    #[must_use]
    pub fn new(graph: &'g SubstitutionGraph) -> Self {
        Self {
            graph,
            scope: VisitedScope::default(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: VisitedScope) -> Self {
        self.scope = scope;
        self
    }

    /// Resolve a batch of requested names into the names to install.
    ///
    /// Every name is validated before any is resolved, so a malformed name
    /// fails the whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidPackageName`] for the first malformed
    /// name.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeSet<String>, PackageError> {
        for name in names {
            validate_name(name.as_ref())?;
        }

        let mut resolved = BTreeSet::new();
        let mut visited = HashSet::new();
        for name in names {
            if self.scope == VisitedScope::PerPackage {
                visited.clear();
            }
            self.substitute(name.as_ref(), &mut visited, &mut resolved);
        }
        Ok(resolved)
    }

    /// Resolve a single name.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidPackageName`] if `name` is malformed.
    pub fn resolve_one(&self, name: &str) -> Result<BTreeSet<String>, PackageError> {
        self.resolve(&[name])
    }

    fn substitute(&self, name: &str, visited: &mut HashSet<String>, out: &mut BTreeSet<String>) {
        // A name seen before in this traversal terminates the cycle as itself.
        if !visited.insert(name.to_owned()) {
            out.insert(name.to_owned());
            return;
        }
        match self.graph.get(name) {
            None => {
                out.insert(name.to_owned());
            }
            Some(substitute) => {
                for replacement in substitute.names() {
                    self.substitute(replacement, visited, out);
                }
            }
        }
    }
}

/// Resolve `names` against `graph` with an independent visited set per name.
///
/// # Errors
///
/// Returns [`PackageError::InvalidPackageName`] if any name is malformed.
pub fn resolve<S: AsRef<str>>(
    graph: &SubstitutionGraph,
    names: &[S],
) -> Result<BTreeSet<String>, PackageError> {
    PackageResolver::new(graph).resolve(names)
}

/// Reject names that no package manager would accept.
fn validate_name(name: &str) -> Result<(), PackageError> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(PackageError::InvalidPackageName(format!("{name:?}")));
    }
    Ok(())
}
