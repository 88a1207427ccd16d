//! Change application
//!
//! Operations of a changeset are applied independently: each one is
//! risk-gated, resolved into a [`FileAction`], and executed under a path lock.
//! There is no cross-operation transaction; a failed operation is recorded and
//! the next one proceeds. Re-running is safe because verbatim replaces fail
//! their old-content check once applied.

mod action;
mod applier;
mod error;
mod patch;
mod result;

pub use action::FileAction;
pub use applier::{ApplyOptions, ChangeApplier};
pub use error::{ApplyError, ApplyErrorKind};
pub use patch::{derive_prompt_path, replace_first, set_json_path};
pub use result::{AppliedOperation, ApplicationResult, ApplicationSummary, FailedOperation};
