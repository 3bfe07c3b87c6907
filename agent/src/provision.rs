use std::{io, path::PathBuf};

use tracing::{debug, error};

/// The outcome of [`ensure_directories`].
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Directories that did not exist and were created by this call.
    pub created: Vec<PathBuf>,
    /// Directories that could not be created.
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Makes sure every directory in `dirs` exists, creating the missing ones in the given order.
///
/// Failing to create a directory is logged and otherwise ignored. Whoever actually needs the
/// directory will fail later with a more specific error.
pub fn ensure_directories(dirs: &[PathBuf]) -> ProvisionReport {
    let mut report = ProvisionReport::default();
    for dir in dirs {
        if dir.is_dir() {
            continue;
        }
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                debug!("created {}", dir.display());
                report.created.push(dir.clone());
            }
            Err(err) => {
                error!("failed to create {}: {}", dir.display(), err);
                report.failed.push((dir.clone(), err));
            }
        }
    }
    report
}
