//! The one-shot extension management commands.

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context as _, Result};
use tracing::debug;

use crate::{cli::Args, config::EnvironmentContext, launch::OneShotCommand};

pub struct ExtensionCli {
    env: Arc<EnvironmentContext>,
}

impl ExtensionCli {
    pub fn new(env: Arc<EnvironmentContext>) -> Self {
        Self { env }
    }

    /// The identifiers of the installed extensions, sorted and without duplicates.
    pub async fn installed(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .installed_folders()
            .await?
            .iter()
            .map(|folder| extension_id(folder).to_string())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn installed_folders(&self) -> Result<Vec<String>> {
        let extensions_path = self.env.extensions_path();
        let mut entries = tokio::fs::read_dir(extensions_path)
            .await
            .with_context(|| format!("reading {}", extensions_path.display()))?;
        let mut folders = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            folders.push(name);
        }
        Ok(folders)
    }

    /// Removes every installed version of the extension with the given identifier.
    ///
    /// Identifiers are compared case-insensitively. Returns the removed folders.
    pub async fn uninstall(&self, id: &str) -> Result<Vec<PathBuf>> {
        let matching: Vec<PathBuf> = self
            .installed_folders()
            .await?
            .into_iter()
            .filter(|folder| extension_id(folder).eq_ignore_ascii_case(id))
            .map(|folder| self.env.extensions_path().join(folder))
            .collect();
        if matching.is_empty() {
            bail!("Extension '{}' is not installed.", id);
        }
        for folder in &matching {
            debug!("removing {}", folder.display());
            tokio::fs::remove_dir_all(folder)
                .await
                .with_context(|| format!("removing {}", folder.display()))?;
        }
        Ok(matching)
    }
}

impl OneShotCommand for ExtensionCli {
    fn should_run(args: &Args) -> bool {
        args.list_extensions || args.uninstall_extension.is_some()
    }

    async fn run(&self, args: &Args) -> Result<()> {
        if let Some(id) = &args.uninstall_extension {
            self.uninstall(id).await?;
            println!("Extension '{}' was successfully uninstalled!", id);
        }
        if args.list_extensions {
            for id in self.installed().await? {
                println!("{}", id);
            }
        }
        Ok(())
    }
}

/// Strips the version from an extension folder name: `publisher.name-1.2.3` becomes
/// `publisher.name`.
fn extension_id(folder: &str) -> &str {
    match folder.rsplit_once('-') {
        Some((id, version)) if version.starts_with(|c: char| c.is_ascii_digit()) => id,
        _ => folder,
    }
}
