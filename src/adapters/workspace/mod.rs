pub mod git_worktree;

pub use git_worktree::GitWorktreeProvisioner;
