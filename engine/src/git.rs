//! Git lookups for index finalization.

use std::path::Path;

use git2::Repository;

/// Current HEAD commit hash, or `None` when the path is not a git repository
/// (including unborn repositories with no commits yet).
pub fn current_commit(repository_path: &Path) -> Option<String> {
    let repo = Repository::discover(repository_path).ok()?;
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_git_directory_has_no_commit() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(current_commit(dir.path()), None);
    }

    #[test]
    fn fresh_repository_without_commits_has_no_commit() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        assert_eq!(current_commit(dir.path()), None);
    }

    #[test]
    fn committed_repository_reports_head() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        let commit = current_commit(dir.path()).unwrap();
        assert_eq!(commit.len(), 40);
    }
}
