//! Stack file parser for loading and merging configuration.
//!
//! This module handles loading the stack specification from YAML files and
//! environment variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, StratusError};
use std::path::Path;
use tracing::{debug, info};

use super::spec::StackConfig;

/// Parser for loading the stack specification.
#[derive(Debug, Default)]
pub struct StackParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl StackParser {
    /// Creates a new stack parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the stack specification from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading stack from: {}", path.display());

        if !path.exists() {
            return Err(StratusError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StratusError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses the stack specification from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing YAML stack specification");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StratusError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Successfully parsed stack for project: {}", config.project.name);
        Ok(config)
    }

    /// Loads the stack with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `STRATUS_<SECTION>_<KEY>` (e.g., `STRATUS_PROJECT_NAME`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;

        Self::apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Applies environment variable overrides to the stack.
    fn apply_env_overrides(config: &mut StackConfig) {
        // Project overrides
        if let Ok(name) = std::env::var("STRATUS_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Ok(env) = std::env::var("STRATUS_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Ok(region) = std::env::var("STRATUS_PROJECT_REGION") {
            debug!("Overriding project.region from environment");
            config.project.region = Some(region);
        }

        // Provider overrides
        if let Ok(endpoint) = std::env::var("STRATUS_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }

        // State overrides
        if let Ok(path) = std::env::var("STRATUS_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        // Run overrides
        if let Ok(concurrency) = std::env::var("STRATUS_RUN_CONCURRENCY") {
            if let Ok(value) = concurrency.parse() {
                debug!("Overriding run.concurrency from environment");
                config.run.concurrency = value;
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StratusError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider API token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_api_token() -> Result<String> {
        std::env::var("STRATUS_API_TOKEN").map_err(|_| {
            StratusError::Config(ConfigError::MissingEnvVar {
                name: String::from("STRATUS_API_TOKEN"),
            })
        })
    }
}

/// Default stack file names to search for.
pub const DEFAULT_STACK_FILES: &[&str] = &[
    "stratus.stack.yaml",
    "stratus.stack.yml",
    "stack.yaml",
    "stack.yml",
];

/// Finds the stack file in the given directory or parent directories.
///
/// # Errors
///
/// Returns an error if no stack file is found.
pub fn find_stack_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_STACK_FILES {
            let stack_path = current.join(filename);
            if stack_path.exists() {
                info!("Found stack file: {}", stack_path.display());
                return Ok(stack_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StratusError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_STACK_FILES[0]),
    }))
}
