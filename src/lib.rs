pub mod commit;
pub mod diff;
pub mod manager;
pub mod notifier;
pub mod rebase;
pub mod reference;
pub mod repository;
pub mod store;

// Re-exports for easy access
pub use commit::{Commit, CommitOperation, Commits, COMMIT_PREFIX};
pub use manager::{CloneOptions, FetchOptions, Manager, ManagerError};
pub use notifier::Notifier;
pub use rebase::{RebaseChoice, RebaseCommits, RebaseError, RebaseSession};
pub use reference::{
    Identifier, LocalRef, Name, Reference, RelativeRef, RemoteRef, Tag,
};
pub use repository::{AddOptions, ExecOptions, Repository, RepositoryError};
pub use store::{ImageHandle, LayerBuilder, LocalStore, PullOptions, Store};
