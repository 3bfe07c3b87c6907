//! Resolution of the on-disk layout and the environment handed to the run modes.
//!
//! All paths the agent uses are derived here in one place. Nothing is created on disk by this
//! module, see [`crate::provision`] for that.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Result};

use crate::cli::Args;

/// Environment variable that overrides the root data folder of the agent.
pub const DATA_FOLDER_ENV: &str = "VSCODE_AGENT_FOLDER";

/// Name of the root data folder under the home directory, used when [`DATA_FOLDER_ENV`] is unset.
const DEFAULT_DATA_FOLDER_NAME: &str = ".vscode-remote";

/// The directory layout of the agent's data folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    /// The root data folder. Everything else lives under it.
    pub remote_data_folder: PathBuf,
    /// `<root>/data`
    pub user_data_path: PathBuf,
    /// `<root>/data/User`
    pub app_settings_home: PathBuf,
    /// `<root>/data/User/globalStorage`
    pub global_storage_home: PathBuf,
    /// `<root>/data/Machine`
    pub machine_settings_home: PathBuf,
    /// `<root>/extensions`
    pub extensions_path: PathBuf,
}

impl DataLayout {
    /// Resolves the layout from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve(std::env::var_os(DATA_FOLDER_ENV), dirs::home_dir())
    }

    /// Resolves the layout given the value of [`DATA_FOLDER_ENV`] and the home directory.
    ///
    /// An empty override counts as unset. A relative override is anchored at the current working
    /// directory so that every resulting path is absolute.
    pub fn resolve(data_folder_override: Option<OsString>, home: Option<PathBuf>) -> Result<Self> {
        let remote_data_folder = match data_folder_override.filter(|v| !v.is_empty()) {
            Some(folder) => absolute(PathBuf::from(folder))?,
            None => match home {
                Some(home) => absolute(home)?.join(DEFAULT_DATA_FOLDER_NAME),
                None => bail!(
                    "cannot determine the home directory, set {} to choose a data folder",
                    DATA_FOLDER_ENV
                ),
            },
        };
        Ok(Self::under(remote_data_folder))
    }

    fn under(remote_data_folder: PathBuf) -> Self {
        let user_data_path = remote_data_folder.join("data");
        let app_settings_home = user_data_path.join("User");
        let global_storage_home = app_settings_home.join("globalStorage");
        let machine_settings_home = user_data_path.join("Machine");
        let extensions_path = remote_data_folder.join("extensions");
        Self {
            remote_data_folder,
            user_data_path,
            app_settings_home,
            global_storage_home,
            machine_settings_home,
            extensions_path,
        }
    }

    /// The directories that must exist before the agent runs, in the order they are created.
    pub fn directories(&self) -> Vec<PathBuf> {
        vec![
            self.remote_data_folder.clone(),
            self.extensions_path.clone(),
            self.user_data_path.clone(),
            self.app_settings_home.clone(),
            self.machine_settings_home.clone(),
            self.global_storage_home.clone(),
        ]
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()?.join(path))
}

/// Everything the run modes need to know about where the agent lives.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub args: Args,
    pub layout: DataLayout,
    /// Extensions shipped together with the agent, next to the executable.
    pub builtin_extensions_path: PathBuf,
    pub exec_path: PathBuf,
}

impl EnvironmentContext {
    pub fn new(args: Args, layout: DataLayout, exec_path: PathBuf) -> Arc<Self> {
        let builtin_extensions_path = app_root(&exec_path).join("extensions");
        Arc::new(Self {
            args,
            layout,
            builtin_extensions_path,
            exec_path,
        })
    }

    pub fn remote_data_folder(&self) -> &Path {
        &self.layout.remote_data_folder
    }

    pub fn extensions_path(&self) -> &Path {
        &self.layout.extensions_path
    }
}

fn app_root(exec_path: &Path) -> PathBuf {
    exec_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}
