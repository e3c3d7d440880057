//! Configuration management for tender.
//!
//! The on-disk document is parsed into `Raw*` structs first and converted into
//! validated definitions exactly once. Legacy field migration happens during
//! that conversion, so the rest of the crate only ever sees the current shape.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};
use tracing::{debug, error, warn};

use crate::constants::DEFAULT_CONFIG_FILES;
use crate::error::TenderError;
use crate::group::{ServiceGroup, ServiceOrGroup};

/// Validated configuration: services and groups in declared order.
#[derive(Debug, Clone)]
pub struct Config {
    /// Services in declared order.
    pub services: Vec<Arc<ServiceDefinition>>,
    /// Groups in declared order.
    pub groups: Vec<GroupDefinition>,
    /// Directory of the config file; relative paths resolve against it.
    pub project_dir: PathBuf,
}

/// Immutable description of one supervised service.
#[derive(Debug, Clone, Default)]
pub struct ServiceDefinition {
    /// Unique name. Also the identity token expected in the process command line.
    pub name: String,
    /// Working directory, already resolved against the project directory.
    pub path: Option<PathBuf>,
    /// Directory of the config file that declared this service.
    pub project_dir: PathBuf,
    /// OS filter; the service is skipped on any other platform.
    pub platform: Option<String>,
    /// Build, launch and stop commands.
    pub commands: ServiceCommands,
    /// Environment overrides.
    pub env: Option<EnvConfig>,
    /// Whether the service must be run as root.
    pub requires_sudo: bool,
    /// How to decide that a launch succeeded.
    pub launch_check: Option<LaunchCheck>,
    /// Warmup instructions for the warmup collaborator.
    pub warmup: Option<Warmup>,
    /// Paths watched by the auto-restart collaborator.
    pub watch: Option<WatchSpec>,
}

/// Commands for building, launching and stopping a service. All optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceCommands {
    /// Command to build.
    pub build: Option<String>,
    /// Command to launch.
    pub launch: Option<String>,
    /// Optional command to stop.
    pub stop: Option<String>,
}

/// The criterion used to decide a launched process is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchCheck {
    /// Text expected in a line of the service's output.
    LogText(String),
    /// Ports the process tree is expected to bind.
    Ports(Vec<u16>),
}

impl LaunchCheck {
    /// Ports declared by this check, empty for a log-text check.
    pub fn ports(&self) -> &[u16] {
        match self {
            LaunchCheck::Ports(ports) => ports,
            LaunchCheck::LogText(_) => &[],
        }
    }
}

/// Represents environment variables for a service.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Optional path to an environment file.
    pub file: Option<String>,
    /// Key-value pairs of environment variables.
    pub vars: Option<HashMap<String, String>>,
}

impl EnvConfig {
    /// Resolves the full path to the env file based on a base directory.
    pub fn path(&self, base: &Path) -> Option<PathBuf> {
        self.file.as_ref().map(|f| {
            let path = Path::new(f);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        })
    }
}

/// Directories watched for changes to a service's source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchSpec {
    /// Paths whose changes should trigger a restart.
    pub include: Vec<String>,
    /// Paths to ignore.
    pub exclude: Vec<String>,
}

/// Action run against a service once it is confirmed up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Warmup {
    /// URL to request.
    pub url: Option<String>,
    /// `host:port` to open a TCP connection to.
    pub tcp: Option<String>,
}

/// A named, ordered collection of services and groups.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GroupDefinition {
    /// Group name.
    pub name: String,
    /// Child service or group names, in the order they should be operated on.
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    services: Vec<RawService>,
    #[serde(default)]
    groups: Vec<GroupDefinition>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    name: String,
    path: Option<String>,
    platform: Option<String>,
    #[serde(default, alias = "requiresSudo")]
    requires_sudo: bool,
    #[serde(default)]
    commands: ServiceCommands,
    launch_checks: Option<RawLaunchChecks>,
    /// Deprecated predecessor of `launch_checks.log_text`.
    log_properties: Option<LegacyLogProperties>,
    env: Option<EnvConfig>,
    watch: Option<RawWatch>,
    warmup: Option<Warmup>,
}

#[derive(Debug, Deserialize, Default)]
struct RawLaunchChecks {
    log_text: Option<String>,
    #[serde(default)]
    ports: Vec<u16>,
}

#[derive(Debug, Deserialize)]
struct LegacyLogProperties {
    started: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawWatch {
    Path(String),
    Spec {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RawService {
    /// Migrates legacy fields and validates the launch check.
    fn into_definition(self, project_dir: &Path) -> Result<ServiceDefinition, TenderError> {
        let mut checks = self.launch_checks.unwrap_or_default();
        if let Some(legacy) = self.log_properties {
            debug!(
                "Mapping deprecated log_properties onto launch_checks for '{}'",
                self.name
            );
            checks.log_text = legacy.started;
        }

        let log_text = non_empty(checks.log_text);
        let launch_check = match (log_text, checks.ports.is_empty()) {
            (Some(_), false) => {
                return Err(TenderError::InvalidLaunchCheck { service: self.name });
            }
            (Some(text), true) => Some(LaunchCheck::LogText(text)),
            (None, false) => Some(LaunchCheck::Ports(checks.ports)),
            (None, true) => None,
        };

        let watch = match self.watch {
            Some(RawWatch::Path(path)) if !path.is_empty() => Some(WatchSpec {
                include: vec![path],
                exclude: Vec::new(),
            }),
            Some(RawWatch::Spec { include, exclude }) => Some(WatchSpec { include, exclude }),
            _ => None,
        };

        Ok(ServiceDefinition {
            path: non_empty(self.path).map(|p| project_dir.join(p)),
            project_dir: project_dir.to_path_buf(),
            platform: non_empty(self.platform),
            commands: ServiceCommands {
                build: non_empty(self.commands.build),
                launch: non_empty(self.commands.launch),
                stop: non_empty(self.commands.stop),
            },
            env: self.env,
            requires_sudo: self.requires_sudo,
            launch_check,
            warmup: self.warmup,
            watch,
            name: self.name,
        })
    }
}

impl ServiceDefinition {
    /// Directory commands run in.
    pub fn working_dir(&self) -> &Path {
        self.path.as_deref().unwrap_or(&self.project_dir)
    }

    /// Whether this service may run on the current OS.
    pub fn matches_platform(&self) -> bool {
        match self.platform.as_deref() {
            None => true,
            Some(platform) => {
                let platform = platform.to_ascii_lowercase();
                platform == env::consts::OS
                    || (platform == "darwin" && env::consts::OS == "macos")
            }
        }
    }

    /// Ports declared through a port launch check.
    pub fn declared_ports(&self) -> &[u16] {
        self.launch_check
            .as_ref()
            .map(LaunchCheck::ports)
            .unwrap_or(&[])
    }

    /// Builds the environment overrides, giving inline `env.vars` precedence over
    /// entries loaded from `env.file`.
    pub fn environment(&self) -> HashMap<String, String> {
        let mut resolved = HashMap::new();

        let Some(env_config) = &self.env else {
            return resolved;
        };

        if let Some(file_path) = env_config.path(&self.project_dir) {
            match fs::read_to_string(&file_path) {
                Ok(content) => {
                    for raw_line in content.lines() {
                        let line = raw_line.trim();
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }

                        if let Some((key, value)) = line.split_once('=') {
                            let mut value = value.trim();
                            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"')
                            {
                                value = &value[1..value.len() - 1];
                            }
                            resolved
                                .entry(key.trim().to_string())
                                .or_insert_with(|| value.to_string());
                        } else {
                            warn!(
                                "Ignoring malformed line in env file for '{}': {}",
                                self.name, line
                            );
                        }
                    }
                }
                Err(err) => {
                    error!("Failed to read env file for '{}': {}", self.name, err);
                }
            }
        }

        if let Some(vars) = &env_config.vars {
            for (key, value) in vars {
                resolved.insert(key.clone(), value.clone());
            }
        }

        resolved
    }
}

impl Config {
    /// Converts and validates a parsed document.
    fn from_raw(raw: RawConfig, project_dir: &Path) -> Result<Self, TenderError> {
        let mut seen = HashSet::new();

        let mut services = Vec::with_capacity(raw.services.len());
        for raw_service in raw.services {
            if !seen.insert(raw_service.name.clone()) {
                return Err(TenderError::DuplicateName {
                    name: raw_service.name,
                });
            }
            services.push(Arc::new(raw_service.into_definition(project_dir)?));
        }

        for group in &raw.groups {
            if !seen.insert(group.name.clone()) {
                return Err(TenderError::DuplicateName {
                    name: group.name.clone(),
                });
            }
        }

        let config = Self {
            services,
            groups: raw.groups,
            project_dir: project_dir.to_path_buf(),
        };
        config.validate_groups()?;
        Ok(config)
    }

    /// Looks up a service by name.
    pub fn service(&self, name: &str) -> Option<&Arc<ServiceDefinition>> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Looks up a group by name.
    pub fn group(&self, name: &str) -> Option<&GroupDefinition> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// Checks every group child resolves and no group contains itself.
    fn validate_groups(&self) -> Result<(), TenderError> {
        for group in &self.groups {
            for child in &group.children {
                if self.service(child).is_none() && self.group(child).is_none() {
                    return Err(TenderError::UnknownChild {
                        group: group.name.clone(),
                        child: child.clone(),
                    });
                }
            }
        }

        let mut finished = HashSet::new();
        for group in &self.groups {
            let mut path = Vec::new();
            self.visit_group(group, &mut path, &mut finished)?;
        }
        Ok(())
    }

    fn visit_group<'a>(
        &'a self,
        group: &'a GroupDefinition,
        path: &mut Vec<&'a str>,
        finished: &mut HashSet<&'a str>,
    ) -> Result<(), TenderError> {
        if finished.contains(group.name.as_str()) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|name| *name == group.name) {
            let mut cycle: Vec<&str> = path[start..].to_vec();
            cycle.push(&group.name);
            return Err(TenderError::GroupCycle {
                cycle: cycle.join(" -> "),
            });
        }

        path.push(&group.name);
        for child in &group.children {
            if let Some(child_group) = self.group(child) {
                self.visit_group(child_group, path, finished)?;
            }
        }
        path.pop();
        finished.insert(&group.name);
        Ok(())
    }

    /// Builds the composite for a service or group name.
    pub fn resolve(&self, name: &str) -> Result<ServiceOrGroup, TenderError> {
        if let Some(service) = self.service(name) {
            return Ok(ServiceOrGroup::Service(Arc::clone(service)));
        }

        let group = self.group(name).ok_or_else(|| TenderError::UnknownTarget {
            name: name.to_string(),
        })?;
        let children = group
            .children
            .iter()
            .map(|child| self.resolve(child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ServiceOrGroup::Group(ServiceGroup::new(
            group.name.clone(),
            children,
        )))
    }

    /// Resolves requested names, or every service in declared order when none are given.
    pub fn resolve_targets(&self, names: &[String]) -> Result<Vec<ServiceOrGroup>, TenderError> {
        if names.is_empty() {
            return Ok(self
                .services
                .iter()
                .map(|service| ServiceOrGroup::Service(Arc::clone(service)))
                .collect());
        }
        names.iter().map(|name| self.resolve(name)).collect()
    }
}

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
});

/// Expands `${VAR}` references. Bare `$VAR` is left for the shell.
fn expand_env_vars(input: &str) -> Result<String, TenderError> {
    let mut expanded = String::with_capacity(input.len());
    let mut last = 0;
    for caps in ENV_REFERENCE.captures_iter(input) {
        let (Some(whole), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = env::var(var.as_str()).map_err(|_| TenderError::MissingEnvVar {
            name: var.as_str().to_string(),
        })?;
        expanded.push_str(&input[last..whole.start()]);
        expanded.push_str(&value);
        last = whole.end();
    }
    expanded.push_str(&input[last..]);
    Ok(expanded)
}

/// Parses a config document whose relative paths resolve against `project_dir`.
pub fn parse_config(content: &str, project_dir: &Path) -> Result<Config, TenderError> {
    let expanded = expand_env_vars(content)?;
    let raw: RawConfig = serde_yaml::from_str(&expanded)?;
    Config::from_raw(raw, project_dir)
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<Config, TenderError> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0])),
    };

    let content = fs::read_to_string(&config_path).map_err(|e| {
        TenderError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let base_path = base_path.canonicalize().unwrap_or(base_path);

    parse_config(&content, &base_path)
}
