//! Git operations.
//!
//! Branch detection for the repository containing a project.

use git2::Repository;
use std::path::Path;

/// Returns the checked-out branch of the repository containing `path`.
///
/// `None` outside a repository, on a detached HEAD, or on an unborn branch
/// whose name cannot be resolved.
#[must_use]
pub fn current_branch(path: &Path) -> Option<String> {
    let repo = match Repository::discover(path) {
        Ok(repo) => repo,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Not a git repository");
            return None;
        },
    };

    match repo.head() {
        Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
        Ok(_) => None,
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => unborn_branch_name(&repo),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to resolve HEAD");
            None
        },
    }
}

fn unborn_branch_name(repo: &Repository) -> Option<String> {
    let head = repo.find_reference("HEAD").ok()?;
    let target = head.symbolic_target()?;
    target.strip_prefix("refs/heads/").map(str::to_string)
}
