use super::CustomMetricSpec;

/// Stable identity of a container.
///
/// The canonical name is the container's cgroup-like absolute path (`"/"`
/// for the root container). A reference is immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerReference {
    /// Canonical, absolute name of the container.
    pub name: String,
    /// Display aliases, e.g. runtime-assigned ids or user-visible names.
    pub aliases: Vec<String>,
    /// Namespace the aliases belong to, e.g. `docker`.
    pub namespace: String,
}

impl ContainerReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            namespace: String::new(),
        }
    }
}

/// Declared CPU capabilities and limits of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuSpec {
    /// Relative weight of this container against its siblings.
    pub limit: u64,
    /// Upper bound of CPU shares the container may consume.
    pub max_limit: u64,
}

/// Declared memory limits of a container, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySpec {
    pub limit: u64,
    pub swap_limit: u64,
}

/// Declared capabilities and limits of a container.
///
/// Refreshed at most every 5 seconds from the handler and stored under the
/// tracker's spec mutex.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    pub has_cpu: bool,
    pub cpu: CpuSpec,
    pub has_memory: bool,
    pub memory: MemorySpec,
    pub has_network: bool,
    pub has_filesystem: bool,
    pub has_diskio: bool,
    /// Whether any user-defined metric endpoints are declared.
    pub has_custom_metrics: bool,
    /// Specs of the declared user-defined metrics.
    pub custom_metrics: Vec<CustomMetricSpec>,
}

/// Snapshot bundle describing one container, returned by copy to callers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerInfo {
    pub reference: ContainerReference,
    pub spec: ContainerSpec,
    /// Direct sub-containers, ordered by name.
    pub subcontainers: Vec<ContainerReference>,
}
