//! Change synthesis: the changeset document and the curator that produces it

mod changeset;
mod curator;

pub use changeset::{
    Changeset, ChangesetMetadata, CreateDetails, CurationMetadata, EditDetails, Operation, OperationType,
    Priority, RiskLevel,
};
pub use curator::{CURATOR_VERSION, Curator};
