//! Discovery of the modules touched by a pull request.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::GitError;
use crate::git;

/// Extension of the files that make up a module.
pub const MODULE_EXTENSION: &str = ".tf";

/// Reduce `git diff --name-only` output to the set of module directories,
/// as absolute paths below `workspace`. Sorted and de-duplicated.
pub fn modules_from_diff(workspace: &Path, diff: &str) -> Vec<PathBuf> {
    let dirs: BTreeSet<PathBuf> = diff
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.ends_with(MODULE_EXTENSION))
        .map(|line| match line.rsplit_once('/') {
            Some((dir, _file)) => workspace.join(dir),
            None => workspace.to_path_buf(),
        })
        .collect();

    dirs.into_iter().collect()
}

/// Changed module directories between `origin/<base_ref>` and HEAD.
pub fn find_changed_modules(workspace: &Path, base_ref: &str) -> Result<Vec<PathBuf>, GitError> {
    debug!(workspace = %workspace.display(), target_branch = %base_ref, "Finding changed modules");
    let diff = git::changed_files(workspace, base_ref)?;
    Ok(modules_from_diff(workspace, &diff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modules_from_diff_filters_and_dedups() {
        let diff = "\
modules/vpc/main.tf
modules/vpc/variables.tf
modules/vpc/README.md
modules/eks/outputs.tf
.github/workflows/ci.yml

";
        let modules = modules_from_diff(Path::new("/ws"), diff);
        assert_eq!(
            modules,
            vec![
                PathBuf::from("/ws/modules/eks"),
                PathBuf::from("/ws/modules/vpc"),
            ]
        );
    }

    #[test]
    fn test_root_level_file_maps_to_workspace() {
        let modules = modules_from_diff(Path::new("/ws"), "main.tf\n");
        assert_eq!(modules, vec![PathBuf::from("/ws")]);
    }

    #[test]
    fn test_similar_extensions_are_ignored() {
        let diff = "a/terraform.tfvars\nb/main.tf.json\nc/state.tfstate\n";
        assert!(modules_from_diff(Path::new("/ws"), diff).is_empty());
    }

    #[test]
    fn test_empty_diff() {
        assert!(modules_from_diff(Path::new("/ws"), "").is_empty());
    }
}
