//! Settings files for dicopt.
//!
//! Engine parameters can be overridden from INI-format files. Files are
//! searched in the following order, later files overriding earlier ones key
//! by key:
//!
//! 1. System configuration (`/etc/dicopt/dicopt_config.cfg`)
//! 2. User configuration (`~/.config/dicopt/dicopt_config.cfg`)
//! 3. Local configuration (`./dicopt_config.cfg`)
//!
//! Anything not set in a file keeps its built-in default.
//!
//! # Configuration File Format
//!
//! ```ini
//! [coordinates]
//! mode = optimization
//! max_frag_dist = 12.0
//!
//! [step]
//! max_step = 0.1
//! hessian_update = bfgs
//!
//! [backtransform]
//! max_retries = 100
//!
//! [convergence]
//! rms_g = 0.0003
//!
//! [optimizer]
//! max_steps = 50
//!
//! [logging]
//! level = info
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use dicopt::settings::SettingsManager;
//!
//! let settings = SettingsManager::load().unwrap();
//! println!("Configuration loaded from: {}", settings.config_source());
//! let config = settings.config().clone();
//! ```

use crate::config::{Config, CoordinateMode, HessianUpdate};
use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// File name searched for in each configuration directory.
pub const CONFIG_FILE_NAME: &str = "dicopt_config.cfg";

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

type Section = HashMap<String, Option<String>>;

/// Logging configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level: error, warn, info, debug or trace (default: "info")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingSettings {
    /// The level as a `log` filter, `Info` for unrecognized names.
    pub fn level_filter(&self) -> log::LevelFilter {
        log::LevelFilter::from_str(self.level.trim()).unwrap_or(log::LevelFilter::Info)
    }
}

/// Everything a settings file can configure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Engine configuration
    pub config: Config,
    /// Logging configuration
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parses INI text on top of the defaults.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        settings.apply_ini_str(content)?;
        Ok(settings)
    }

    /// Applies the keys present in INI text, leaving the rest unchanged.
    pub fn apply_ini_str(&mut self, content: &str) -> Result<(), ConfigError> {
        let mut ini = Ini::new();
        let map = ini
            .read(content.to_string())
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;

        if let Some(section) = map.get("coordinates") {
            self.apply_coordinates(section)?;
        }
        if let Some(section) = map.get("step") {
            self.apply_step(section)?;
        }
        if let Some(section) = map.get("backtransform") {
            self.apply_back_transform(section)?;
        }
        if let Some(section) = map.get("convergence") {
            let t = &mut self.config.thresholds;
            parse_positive(section, "rms_g", &mut t.rms_g)?;
            parse_positive(section, "max_g", &mut t.max_g)?;
            parse_positive(section, "rms", &mut t.rms)?;
            parse_positive(section, "max_dis", &mut t.max_dis)?;
        }
        if let Some(section) = map.get("optimizer") {
            parse_value(section, "max_steps", &mut self.config.max_steps)?;
            parse_value(
                section,
                "rebuild_basis_each_step",
                &mut self.config.rebuild_basis_each_step,
            )?;
        }
        if let Some(section) = map.get("logging") {
            if let Some(Some(level)) = section.get("level") {
                self.logging.level = level.clone();
            }
        }
        Ok(())
    }

    fn apply_coordinates(&mut self, section: &Section) -> Result<(), ConfigError> {
        let c = &mut self.config.coordinates;
        if let Some(Some(mode)) = section.get("mode") {
            c.mode = CoordinateMode::parse(mode)
                .ok_or_else(|| ConfigError::InvalidValue(format!("Invalid coordinate mode: {}", mode)))?;
        }
        parse_positive(section, "max_frag_dist", &mut c.max_frag_dist)?;
        parse_positive(section, "linear_angle_threshold", &mut c.linear_angle_threshold)?;
        if c.linear_angle_threshold >= 180.0 {
            return Err(ConfigError::InvalidValue(format!(
                "linear_angle_threshold must be below 180 degrees, got {}",
                c.linear_angle_threshold
            )));
        }
        Ok(())
    }

    fn apply_step(&mut self, section: &Section) -> Result<(), ConfigError> {
        let s = &mut self.config.step;
        parse_positive(section, "max_mode_step", &mut s.max_mode_step)?;
        parse_positive(section, "max_step", &mut s.max_step)?;
        parse_positive(section, "scale_qn", &mut s.scale_qn)?;
        parse_value(section, "new_hess", &mut s.new_hess)?;
        parse_positive(section, "max_scale", &mut s.max_scale)?;
        if let Some(Some(update)) = section.get("hessian_update") {
            s.hessian_update = match update.trim().to_lowercase().as_str() {
                "none" | "off" => HessianUpdate::None,
                "bfgs" => HessianUpdate::Bfgs,
                other => {
                    return Err(ConfigError::InvalidValue(format!("Invalid hessian_update: {}", other)));
                }
            };
        }
        Ok(())
    }

    fn apply_back_transform(&mut self, section: &Section) -> Result<(), ConfigError> {
        let b = &mut self.config.back_transform;
        parse_value(section, "max_iterations", &mut b.max_iterations)?;
        parse_positive(section, "initial_scale", &mut b.initial_scale)?;
        parse_positive(section, "dq_tolerance", &mut b.dq_tolerance)?;
        parse_positive(section, "magnitude_tolerance", &mut b.magnitude_tolerance)?;
        parse_positive(section, "divergence_ratio", &mut b.divergence_ratio)?;
        parse_non_negative(section, "max_displacement_per_atom", &mut b.max_displacement_per_atom)?;
        parse_value(section, "max_retries", &mut b.max_retries)?;
        if b.max_iterations == 0 {
            return Err(ConfigError::InvalidValue("max_iterations must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(section: &Section, key: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Some(Some(raw)) = section.get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("Invalid {}: {}", key, raw)))?;
    }
    Ok(())
}

fn parse_positive(section: &Section, key: &str, target: &mut f64) -> Result<(), ConfigError> {
    let mut value = *target;
    parse_value(section, key, &mut value)?;
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::InvalidValue(format!("{} must be positive, got {}", key, value)));
    }
    *target = value;
    Ok(())
}

fn parse_non_negative(section: &Section, key: &str, target: &mut f64) -> Result<(), ConfigError> {
    let mut value = *target;
    parse_value(section, key, &mut value)?;
    if !(value.is_finite() && value >= 0.0) {
        return Err(ConfigError::InvalidValue(format!("{} must be non-negative, got {}", key, value)));
    }
    *target = value;
    Ok(())
}

/// Configuration manager that handles loading and accessing program settings.
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the standard locations.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub fn load() -> Result<Self, ConfigError> {
        let mut paths = Vec::new();
        if let Some(system) = Self::get_system_config_path() {
            paths.push(("system", system));
        }
        if let Some(user) = Self::get_user_config_path() {
            paths.push(("user", user));
        }
        paths.push(("local", PathBuf::from(CONFIG_FILE_NAME)));

        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();
        for (kind, path) in paths {
            if !path.exists() {
                continue;
            }
            let mut candidate = settings.clone();
            match fs::read_to_string(&path)
                .map_err(ConfigError::from)
                .and_then(|content| candidate.apply_ini_str(&content))
            {
                Ok(()) => {
                    settings = candidate;
                    config_source = format!("{} config ({})", kind, path.display());
                    debug!("Loaded {} configuration from: {}", kind, path.display());
                }
                Err(e) => {
                    warn!("Failed to load {} config from {}: {}", kind, path.display(), e);
                }
            }
        }

        Ok(Self {
            settings,
            config_source,
        })
    }

    /// Loads a single file on top of the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(Self {
            settings: Settings::from_ini_str(&content)?,
            config_source: format!("file ({})", path.display()),
        })
    }

    /// Returns the source of the loaded configuration.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// Gets a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Gets the engine configuration.
    pub fn config(&self) -> &Config {
        &self.settings.config
    }

    /// Gets the logging settings.
    pub fn logging(&self) -> &LoggingSettings {
        &self.settings.logging
    }

    /// Gets the system configuration file path.
    fn get_system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/dicopt").join(CONFIG_FILE_NAME))
        }
        #[cfg(windows)]
        {
            std::env::var("PROGRAMDATA")
                .ok()
                .map(|pd| PathBuf::from(pd).join("dicopt").join(CONFIG_FILE_NAME))
        }
    }

    /// Gets the user configuration file path.
    fn get_user_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config").join("dicopt").join(CONFIG_FILE_NAME))
        }
        #[cfg(windows)]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|appdata| PathBuf::from(appdata).join("dicopt").join(CONFIG_FILE_NAME))
        }
    }

    /// Writes a commented settings file containing every option at its
    /// default value.
    pub fn create_template(path: &Path) -> Result<(), ConfigError> {
        fs::write(path, Self::generate_template_content())?;
        info!("Created settings template at: {}", path.display());
        Ok(())
    }

    /// Generates the content of a settings template.
    pub fn generate_template_content() -> String {
        let config = Config::default();
        let logging = LoggingSettings::default();
        let mode = match config.coordinates.mode {
            CoordinateMode::Static => "static",
            CoordinateMode::Optimization => "optimization",
            CoordinateMode::FragmentsOnly => "fragments",
        };
        let update = match config.step.hessian_update {
            HessianUpdate::None => "none",
            HessianUpdate::Bfgs => "bfgs",
        };
        format!(
            r#"# dicopt configuration file
#
# Files are loaded in this order, later files overriding earlier ones:
#
# 1. System config directory (/etc/dicopt/dicopt_config.cfg)
# 2. User config directory (~/.config/dicopt/dicopt_config.cfg)
# 3. Current working directory (./dicopt_config.cfg)
#
# Missing sections or values use the built-in defaults shown below.

[coordinates]
# Primitive construction mode: static, optimization, fragments (or 0, 1, 2)
# static: bonds/angles/torsions exactly as given
# optimization: bridge disconnected fragments and tie near-linear angles
# fragments: bridge disconnected fragments only
mode = {}

# Longest bond (Angstrom) allowed when bridging two fragments
max_frag_dist = {}

# Angles above this (degrees) are treated as linear
linear_angle_threshold = {}

[step]
# Largest step along one Hessian eigenmode
max_mode_step = {}

# Largest norm of the whole step
max_step = {}

# Base step scale and new-Hessian counter; scale = min(scale_qn * new_hess, max_scale)
scale_qn = {}
new_hess = {}
max_scale = {}

# Primitive Hessian update: none, bfgs
hessian_update = {}

[backtransform]
# Iterations per back-transform attempt
max_iterations = {}

# Initial damping divisor for each Cartesian update
initial_scale = {}

# Stop when the residual or the squared move drops below these
dq_tolerance = {}
magnitude_tolerance = {}

# Roll back when the residual grows by more than this factor
divergence_ratio = {}

# Largest accepted move per atom (Angstrom); larger moves trigger a retry
max_displacement_per_atom = {}

# Retries allowed over the whole optimization
max_retries = {}

[convergence]
# Gradient thresholds (q-space) and displacement thresholds (Angstrom)
rms_g = {}
max_g = {}
rms = {}
max_dis = {}

[optimizer]
# Step budget for optimize_until_converged and the demo driver
max_steps = {}

# Recompute the delocalized basis at the start of every step
rebuild_basis_each_step = {}

[logging]
# Log level: error, warn, info, debug, trace
level = {}
"#,
            mode,
            config.coordinates.max_frag_dist,
            config.coordinates.linear_angle_threshold,
            config.step.max_mode_step,
            config.step.max_step,
            config.step.scale_qn,
            config.step.new_hess,
            config.step.max_scale,
            update,
            config.back_transform.max_iterations,
            config.back_transform.initial_scale,
            config.back_transform.dq_tolerance,
            config.back_transform.magnitude_tolerance,
            config.back_transform.divergence_ratio,
            config.back_transform.max_displacement_per_atom,
            config.back_transform.max_retries,
            config.thresholds.rms_g,
            config.thresholds.max_g,
            config.thresholds.rms,
            config.thresholds.max_dis,
            config.max_steps,
            config.rebuild_basis_each_step,
            logging.level,
        )
    }
}
