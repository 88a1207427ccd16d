//! Playbook: the versioned directory of pipeline artifacts and history logs

mod store;
mod version;

pub use store::{
    CHANGESETS_DIR, CONFIG_DIR, ChangesetRecord, LOCKS_DIR, MODULES_DIR, PROMPTS_DIR, PlaybookSnapshot,
    PlaybookStore, REPORTS_DIR, VOCABULARIES_DIR,
};
pub use version::{RollbackPoint, VERSION_FILE, VersionManager};
