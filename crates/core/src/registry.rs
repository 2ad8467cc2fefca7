//! Policy Registry
//!
//! Loads the set of executable robot policies from a directory of YAML files,
//! one file per policy. The file stem is the policy's canonical name and must
//! follow the `<verb>_<object>` convention (e.g. `grab_cup`), because the
//! object half of the name is what the intent extractor matches on.
//!
//! A loaded [`PolicyRegistry`] never changes. [`RegistryHandle`] adds an
//! explicit reload that swaps in a freshly loaded snapshot.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Separator between the verb and the object of a policy name.
pub const NAME_SEPARATOR: char = '_';

/// Errors raised while loading or querying the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Policy directory '{0}' does not exist")]
    MissingDirectory(PathBuf),
    #[error("Policy directory '{0}' contains no policy files")]
    Empty(PathBuf),
    #[error("Failed to read policy file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse policy file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Policy name '{0}' does not follow the <verb>_<object> convention")]
    InvalidName(String),
    #[error("Policy '{0}' has a non-positive control duration")]
    InvalidDuration(String),
    #[error("Duplicate policy name '{0}'")]
    Duplicate(String),
    #[error("Unknown policy '{0}'")]
    NotFound(String),
}

/// A single executable policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDescriptor {
    pub name: String,
    pub description: String,
    /// Opaque reference the control loop uses to locate trained weights.
    pub model_reference: String,
    pub control_duration: Duration,
}

impl PolicyDescriptor {
    /// Creates a descriptor after checking the naming and duration invariants.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        model_reference: impl Into<String>,
        control_duration: Duration,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if split_name(&name).is_none() {
            return Err(RegistryError::InvalidName(name));
        }
        if control_duration.is_zero() {
            return Err(RegistryError::InvalidDuration(name));
        }
        Ok(Self {
            name,
            description: description.into(),
            model_reference: model_reference.into(),
            control_duration,
        })
    }

    /// The object half of the name (`cup` for `grab_cup`).
    pub fn keyword(&self) -> &str {
        split_name(&self.name).map(|(_, object)| object).unwrap_or(&self.name)
    }
}

/// Splits `<verb>_<object>[_...]` into its first two tokens.
fn split_name(name: &str) -> Option<(&str, &str)> {
    let mut tokens = name.split(NAME_SEPARATOR);
    let verb = tokens.next().filter(|t| !t.is_empty())?;
    let object = tokens.next().filter(|t| !t.is_empty())?;
    Some((verb, object))
}

/// On-disk shape of a policy file. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    repo_id: String,
    control_time_s: f64,
    #[serde(default)]
    description: Option<String>,
    /// Registration position. Files without one follow, in file-name order.
    #[serde(default)]
    order: Option<i64>,
}

/// The immutable, non-empty set of policies, in registration order.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: Vec<PolicyDescriptor>,
}

impl PolicyRegistry {
    /// Builds a registry from descriptors, keeping their order.
    pub fn from_descriptors(policies: Vec<PolicyDescriptor>) -> Result<Self, RegistryError> {
        if policies.is_empty() {
            return Err(RegistryError::Empty(PathBuf::new()));
        }
        for (i, policy) in policies.iter().enumerate() {
            if policies[..i].iter().any(|p| p.name == policy.name) {
                return Err(RegistryError::Duplicate(policy.name.clone()));
            }
        }
        Ok(Self { policies })
    }

    /// Loads every `*.yaml`/`*.yml` file in `dir`. Files carrying an `order`
    /// key come first, ascending; the rest follow sorted by file name.
    pub fn load(dir: &Path) -> Result<Self, RegistryError> {
        if !dir.is_dir() {
            return Err(RegistryError::MissingDirectory(dir.to_path_buf()));
        }

        let read_err = |source: std::io::Error| RegistryError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            let is_yaml = matches!(
                path.extension().and_then(|s| s.to_str()),
                Some("yaml") | Some("yml")
            );
            if path.is_file() && is_yaml {
                paths.push(path);
            } else {
                debug!(path = %path.display(), "Skipping non-policy entry");
            }
        }
        paths.sort();

        if paths.is_empty() {
            return Err(RegistryError::Empty(dir.to_path_buf()));
        }

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            loaded.push(load_policy_file(&path)?);
        }
        loaded.sort_by_key(|(order, _)| order.map_or((1, 0), |o| (0, o)));
        let policies = loaded.into_iter().map(|(_, policy)| policy).collect();

        let registry = Self::from_descriptors(policies).map_err(|e| match e {
            RegistryError::Empty(_) => RegistryError::Empty(dir.to_path_buf()),
            other => other,
        })?;
        info!(
            dir = %dir.display(),
            count = registry.len(),
            fallback = %registry.fallback().name,
            "Policy registry loaded"
        );
        Ok(registry)
    }

    pub fn list(&self) -> &[PolicyDescriptor] {
        &self.policies
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyDescriptor> {
        self.policies.iter()
    }

    pub fn lookup(&self, name: &str) -> Result<&PolicyDescriptor, RegistryError> {
        self.policies
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.iter().any(|p| p.name == name)
    }

    /// The first-registered policy. Always present: construction rejects an
    /// empty set.
    pub fn fallback(&self) -> &PolicyDescriptor {
        &self.policies[0]
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

fn load_policy_file(path: &Path) -> Result<(Option<i64>, PolicyDescriptor), RegistryError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| RegistryError::InvalidName(path.display().to_string()))?
        .to_string();
    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: PolicyFile = serde_yaml::from_str(&content).map_err(|source| RegistryError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if !file.control_time_s.is_finite() || file.control_time_s <= 0.0 {
        return Err(RegistryError::InvalidDuration(name));
    }
    let control_duration = Duration::try_from_secs_f64(file.control_time_s)
        .map_err(|_| RegistryError::InvalidDuration(name.clone()))?;
    let (verb, object) = split_name(&name).ok_or_else(|| RegistryError::InvalidName(name.clone()))?;
    let description = file
        .description
        .unwrap_or_else(|| format!("Can {} {}", verb, object));

    let policy = PolicyDescriptor::new(name, description, file.repo_id, control_duration)?;
    Ok((file.order, policy))
}

/// Shared, swappable view of the current registry.
///
/// Readers take a cheap `Arc` snapshot; a reload replaces the snapshot only
/// when the new directory scan succeeds.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    dir: Option<PathBuf>,
    current: Arc<RwLock<Arc<PolicyRegistry>>>,
}

impl RegistryHandle {
    /// Loads the registry from `dir` and remembers the path for reloads.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let dir = dir.into();
        let registry = PolicyRegistry::load(&dir)?;
        Ok(Self {
            dir: Some(dir),
            current: Arc::new(RwLock::new(Arc::new(registry))),
        })
    }

    /// Wraps an already-built registry. Such a handle cannot be reloaded.
    pub fn fixed(registry: PolicyRegistry) -> Self {
        Self {
            dir: None,
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub fn snapshot(&self) -> Arc<PolicyRegistry> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-reads the policy directory. On failure the previous snapshot stays.
    pub fn reload(&self) -> Result<Arc<PolicyRegistry>, RegistryError> {
        let Some(dir) = &self.dir else {
            warn!("Reload requested on a registry without a backing directory");
            return Ok(self.snapshot());
        };
        let fresh = Arc::new(PolicyRegistry::load(dir)?);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = fresh.clone();
        Ok(fresh)
    }
}
