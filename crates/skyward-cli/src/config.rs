//! Configuration file – reads/writes `~/.skyward/config.toml`.
//!
//! Every section is optional; missing keys fall back to the defaults of the
//! crate that owns them.
//!
//! | Section | Owner |
//! |---|---|
//! | top level | goal and run length |
//! | `[node]` | [`NodeConfig`], cycle rate and failsafe timeouts |
//! | `[sensors]` | [`CoordinatorSettings`] |
//! | `[planner]`, `[cost]`, `[tree]`, `[waypoint]`, `[model]` | [`LocalPlannerConfig`] |
//! | `[sim]` | [`SimConfig`] |

use serde::{Deserialize, Serialize};
use skyward_planner::cost::CostParameters;
use skyward_planner::tree::TreeParameters;
use skyward_planner::waypoint::WaypointParameters;
use skyward_runtime::coordinator::CoordinatorSettings;
use skyward_runtime::local_planner::{LocalPlannerConfig, PlannerParameters};
use skyward_runtime::node::NodeConfig;
use skyward_types::{ModelParameters, PlannerError, Vec3};
use std::fs;
use std::path::{Path, PathBuf};

use crate::sim::SimConfig;

/// Persisted run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Stop after this many cycles; runs until the goal or Ctrl-C otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,

    /// Goal position in the local frame.
    #[serde(default = "default_goal")]
    pub goal: Vec3,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub sensors: CoordinatorSettings,

    #[serde(default)]
    pub planner: PlannerParameters,

    #[serde(default)]
    pub cost: CostParameters,

    #[serde(default)]
    pub tree: TreeParameters,

    #[serde(default)]
    pub waypoint: WaypointParameters,

    #[serde(default)]
    pub model: ModelParameters,

    #[serde(default)]
    pub sim: SimConfig,
}

fn default_goal() -> Vec3 {
    Vec3::new(0.0, 20.0, 3.0)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cycles: None,
            goal: default_goal(),
            node: NodeConfig::default(),
            sensors: CoordinatorSettings::default(),
            planner: PlannerParameters::default(),
            cost: CostParameters::default(),
            tree: TreeParameters::default(),
            waypoint: WaypointParameters::default(),
            model: ModelParameters::default(),
            sim: SimConfig::default(),
        }
    }
}

impl Config {
    /// The planner sections bundled for [`LocalPlanner::new`][skyward_runtime::LocalPlanner::new].
    pub fn local_planner_config(&self) -> LocalPlannerConfig {
        LocalPlannerConfig {
            planner: self.planner,
            cost: self.cost,
            tree: self.tree,
            waypoint: self.waypoint,
            model: self.model,
        }
    }
}

/// Return the path to `~/.skyward/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".skyward").join("config.toml")
}

/// Load the config at `path` and apply the environment overrides. Returns
/// `None` if the file does not exist.
pub fn load(path: &Path) -> Result<Option<Config>, PlannerError> {
    let mut cfg = load_from(path)?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Parse the file at `path` without environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, PlannerError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        PlannerError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| PlannerError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Parse `"x,y,z"` into a [`Vec3`].
fn parse_vec3(raw: &str) -> Option<Vec3> {
    let mut parts = raw.split(',').map(|p| p.trim().parse::<f32>());
    let (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    Some(Vec3::new(x, y, z))
}

/// Apply `SKYWARD_*` environment variable overrides to `cfg`.
///
/// Unparsable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `SKYWARD_GOAL` | `goal`, as `x,y,z` |
/// | `SKYWARD_CYCLE_HZ` | `node.cycle_hz` |
/// | `SKYWARD_MAX_CYCLES` | `max_cycles` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SKYWARD_GOAL")
        && let Some(goal) = parse_vec3(&v)
    {
        cfg.goal = goal;
    }
    if let Ok(v) = std::env::var("SKYWARD_CYCLE_HZ")
        && let Ok(hz) = v.parse::<f32>()
        && hz > 0.0
    {
        cfg.node.cycle_hz = hz;
    }
    if let Ok(v) = std::env::var("SKYWARD_MAX_CYCLES")
        && let Ok(n) = v.parse::<u64>()
    {
        cfg.max_cycles = Some(n);
    }
}

/// Save the config to disk, creating `~/.skyward/` if necessary.
pub fn save(cfg: &Config) -> Result<(), PlannerError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), PlannerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            PlannerError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                PlannerError::Config(format!("failed to restrict {}: {e}", parent.display()))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PlannerError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| PlannerError::Config(format!("failed to write {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.goal, default_goal());
        assert_eq!(loaded.sim.obstacles.len(), cfg.sim.obstacles.len());
        assert_eq!(loaded.local_planner_config(), LocalPlannerConfig::default());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "max_cycles = 40\n\n[goal]\nx = 1.0\ny = 2.0\nz = 3.0\n\n[model]\nxy_vel = 2.5\n",
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.max_cycles, Some(40));
        assert_eq!(cfg.goal, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(cfg.model.xy_vel, 2.5);
        assert_eq!(cfg.model.up_vel, ModelParameters::default().up_vel);
        assert_eq!(cfg.node, NodeConfig::default());
        assert_eq!(cfg.local_planner_config().model.xy_vel, 2.5);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "goal = [[[").unwrap();
        assert!(matches!(load_from(&path), Err(PlannerError::Config(_))));
    }

    #[test]
    fn config_path_points_to_skyward_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".skyward"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn parse_vec3_accepts_exactly_three_numbers() {
        assert_eq!(parse_vec3("1, -2.5,3"), Some(Vec3::new(1.0, -2.5, 3.0)));
        assert_eq!(parse_vec3("1,2"), None);
        assert_eq!(parse_vec3("1,2,3,4"), None);
        assert_eq!(parse_vec3("a,b,c"), None);
    }

    // Each test touches its own variable so they can run in parallel.

    #[test]
    fn apply_env_overrides_changes_goal() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("SKYWARD_GOAL", "4,5,6") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.goal, Vec3::new(4.0, 5.0, 6.0));
        unsafe { std::env::remove_var("SKYWARD_GOAL") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_rate() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("SKYWARD_CYCLE_HZ", "-3") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.node.cycle_hz, NodeConfig::default().cycle_hz);
        unsafe { std::env::remove_var("SKYWARD_CYCLE_HZ") };
    }

    #[test]
    fn apply_env_overrides_changes_max_cycles() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("SKYWARD_MAX_CYCLES", "250") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.max_cycles, Some(250));
        unsafe { std::env::remove_var("SKYWARD_MAX_CYCLES") };
    }
}
