//! Diff collection from the working tree using git2.

use std::fmt;
use std::path::Path;

use git2::{
    Delta, Diff, DiffDelta, DiffFindOptions, DiffOptions, ErrorCode, Patch, Repository, Tree,
};
use tracing::debug;

use crate::error::{DiffError, RepositoryError};

/// Which pending changes to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Index vs HEAD (`git diff --cached`).
    Staged,
    /// Working tree vs index, untracked files included.
    Unstaged,
    /// Working tree vs HEAD (`git diff HEAD`), untracked files included.
    #[default]
    All,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Staged => write!(f, "staged"),
            Scope::Unstaged => write!(f, "unstaged"),
            Scope::All => write!(f, "pending"),
        }
    }
}

/// Kind of change to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "Added"),
            ChangeKind::Modified => write!(f, "Modified"),
            ChangeKind::Deleted => write!(f, "Deleted"),
            ChangeKind::Renamed => write!(f, "Renamed"),
        }
    }
}

/// The diff of one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeHunk {
    pub path: String,
    /// Old path for renamed files (None for non-rename changes).
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    /// Unified diff hunks, always ending on a complete line. Empty for binaries.
    pub body: String,
    pub binary: bool,
    /// Body was cut to fit the byte budget.
    pub truncated: bool,
    pub additions: usize,
    pub deletions: usize,
}

/// All collected changes for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffBundle {
    pub scope: Scope,
    pub hunks: Vec<ChangeHunk>,
    /// Bytes across all hunk bodies.
    pub total_size: usize,
    pub truncated: bool,
}

impl DiffBundle {
    /// Assemble a bundle from already-collected hunks, applying `max_bytes`.
    pub fn from_hunks(scope: Scope, mut hunks: Vec<ChangeHunk>, max_bytes: usize) -> Self {
        let truncated = apply_byte_budget(&mut hunks, max_bytes);
        let total_size = hunks.iter().map(|h| h.body.len()).sum();
        Self {
            scope,
            hunks,
            total_size,
            truncated,
        }
    }

    pub fn file_count(&self) -> usize {
        self.hunks.len()
    }

    pub fn additions(&self) -> usize {
        self.hunks.iter().map(|h| h.additions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.hunks.iter().map(|h| h.deletions).sum()
    }
}

/// Reads pending changes and produces a size-bounded [`DiffBundle`].
#[derive(Debug, Clone)]
pub struct DiffCollector {
    max_diff_bytes: usize,
}

impl DiffCollector {
    pub fn new(max_diff_bytes: usize) -> Self {
        Self { max_diff_bytes }
    }

    /// Open the repository at `repo_path` and collect its changes for `scope`.
    pub fn collect(&self, repo_path: &Path, scope: Scope) -> Result<DiffBundle, DiffError> {
        let repo = Repository::open(repo_path).map_err(|source| RepositoryError::Open {
            path: repo_path.to_path_buf(),
            source,
        })?;

        if repo.is_bare() {
            return Err(RepositoryError::BareRepository {
                path: repo_path.to_path_buf(),
            }
            .into());
        }

        self.collect_from_repo(&repo, scope)
    }

    /// Collect changes from an already-open repository.
    pub fn collect_from_repo(
        &self,
        repo: &Repository,
        scope: Scope,
    ) -> Result<DiffBundle, DiffError> {
        let diff = scoped_diff(repo, scope)?;
        let hunks = hunks_from_diff(&diff)?;

        if hunks.is_empty() {
            return Err(DiffError::NoChanges { scope });
        }

        let bundle = DiffBundle::from_hunks(scope, hunks, self.max_diff_bytes);
        debug!(
            scope = %scope,
            files = bundle.file_count(),
            bytes = bundle.total_size,
            truncated = bundle.truncated,
            "Collected diff"
        );

        Ok(bundle)
    }
}

/// Resolve the HEAD tree, distinguishing empty-repo errors from real failures.
///
/// Returns `Ok(None)` for repos with no commits (unborn branch / not found),
/// `Ok(Some(tree))` for repos with a valid HEAD, or `ReadFailed` for corrupt
/// HEADs, permission issues and missing objects.
fn resolve_head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, RepositoryError> {
    let head_ref = match repo.head() {
        Ok(r) => r,
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Ok(None);
        }
        Err(e) => return Err(RepositoryError::ReadFailed(e)),
    };

    let tree = head_ref.peel_to_tree().map_err(RepositoryError::ReadFailed)?;
    Ok(Some(tree))
}

fn scoped_diff(repo: &Repository, scope: Scope) -> Result<Diff<'_>, RepositoryError> {
    let head_tree = resolve_head_tree(repo)?;

    let mut opts = DiffOptions::new();
    if scope != Scope::Staged {
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);
    }

    let mut diff = match scope {
        Scope::Staged => repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts)),
        Scope::Unstaged => repo.diff_index_to_workdir(None, Some(&mut opts)),
        Scope::All => repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts)),
    }
    .map_err(RepositoryError::ReadFailed)?;

    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))
        .map_err(RepositoryError::ReadFailed)?;

    Ok(diff)
}

/// Turn every delta of `diff` into a [`ChangeHunk`].
fn hunks_from_diff(diff: &Diff<'_>) -> Result<Vec<ChangeHunk>, RepositoryError> {
    let mut hunks = Vec::new();

    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };
        let Some(kind) = change_kind(delta.status()) else {
            continue;
        };
        let (path, old_path) = delta_paths(&delta, kind);
        if path.is_empty() {
            continue;
        }

        let patch = Patch::from_diff(diff, idx).map_err(RepositoryError::ReadFailed)?;
        let binary = delta.flags().is_binary()
            || patch
                .as_ref()
                .is_none_or(|p| p.delta().flags().is_binary());

        let (body, additions, deletions) = match patch {
            Some(patch) if !binary => patch_body(&patch)?,
            _ => (String::new(), 0, 0),
        };

        hunks.push(ChangeHunk {
            path,
            old_path,
            kind,
            body,
            binary,
            truncated: false,
            additions,
            deletions,
        });
    }

    Ok(hunks)
}

fn change_kind(status: Delta) -> Option<ChangeKind> {
    match status {
        Delta::Added | Delta::Untracked => Some(ChangeKind::Added),
        Delta::Deleted => Some(ChangeKind::Deleted),
        Delta::Renamed => Some(ChangeKind::Renamed),
        Delta::Modified | Delta::Copied | Delta::Typechange | Delta::Conflicted => {
            Some(ChangeKind::Modified)
        }
        Delta::Unmodified | Delta::Ignored | Delta::Unreadable => None,
    }
}

fn delta_paths(delta: &DiffDelta<'_>, kind: ChangeKind) -> (String, Option<String>) {
    let new_path = delta
        .new_file()
        .path()
        .map(|p| p.to_string_lossy().to_string());
    let old_path = delta
        .old_file()
        .path()
        .map(|p| p.to_string_lossy().to_string());

    match kind {
        ChangeKind::Renamed => {
            let path = new_path.clone().or_else(|| old_path.clone()).unwrap_or_default();
            (path, old_path)
        }
        _ => (new_path.or(old_path).unwrap_or_default(), None),
    }
}

/// Render the hunks of a text patch, one complete line at a time.
fn patch_body(patch: &Patch<'_>) -> Result<(String, usize, usize), RepositoryError> {
    let mut body = String::new();

    for hunk_idx in 0..patch.num_hunks() {
        let (hunk, line_count) = patch.hunk(hunk_idx).map_err(RepositoryError::ReadFailed)?;
        push_line(&mut body, None, hunk.header());

        for line_idx in 0..line_count {
            let line = patch
                .line_in_hunk(hunk_idx, line_idx)
                .map_err(RepositoryError::ReadFailed)?;
            // Skip the "\ No newline at end of file" markers ('=', '>', '<').
            let origin = line.origin();
            if matches!(origin, '+' | '-' | ' ') {
                push_line(&mut body, Some(origin), line.content());
            }
        }
    }

    let (_, additions, deletions) = patch.line_stats().map_err(RepositoryError::ReadFailed)?;
    Ok((body, additions, deletions))
}

fn push_line(body: &mut String, origin: Option<char>, content: &[u8]) {
    if let Some(origin) = origin {
        body.push(origin);
    }
    body.push_str(&String::from_utf8_lossy(content));
    if !body.ends_with('\n') {
        body.push('\n');
    }
}

/// Cap hunk bodies so their sum fits `budget`. Returns whether anything was cut.
///
/// Every body larger than a common per-file cap is cut back to its last
/// complete line within the cap, so the largest files lose content first.
fn apply_byte_budget(hunks: &mut [ChangeHunk], budget: usize) -> bool {
    let total: usize = hunks.iter().map(|h| h.body.len()).sum();
    if total <= budget {
        return false;
    }

    let cap = per_file_cap(hunks.iter().map(|h| h.body.len()).collect(), budget);
    for hunk in hunks.iter_mut().filter(|h| h.body.len() > cap) {
        let keep = line_prefix_len(&hunk.body, cap);
        hunk.body.truncate(keep);
        hunk.truncated = true;
    }

    true
}

/// Largest per-file size such that `sum(min(size, cap)) <= budget`.
fn per_file_cap(mut sizes: Vec<usize>, budget: usize) -> usize {
    sizes.sort_unstable();

    let mut remaining = budget;
    let count = sizes.len();
    for (idx, size) in sizes.iter().enumerate() {
        let left = count - idx;
        if size.saturating_mul(left) > remaining {
            return remaining / left;
        }
        remaining -= size;
    }

    usize::MAX
}

/// Length of the longest prefix of `text` made of whole lines and at most `max` bytes.
fn line_prefix_len(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    text.as_bytes()[..max]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1)
}
