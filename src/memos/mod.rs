//! Memo lifecycle: numbering, sealing, transitions, distribution and replies.

pub mod artifact;
pub mod attachments;
pub mod directory;
pub mod distribution;
pub mod error;
pub mod policy;
pub mod seal;
pub mod sequence;
pub mod status;
pub mod thread;
pub mod workflow;

pub use error::{Denial, ErrorClass, WorkflowError, WorkflowResult};
pub use policy::Actor;
pub use seal::{DigitalSeal, RequestContext};
pub use sequence::CorrelativeNumber;
pub use status::{DeliveryMethod, DeliveryState, MemoStatus, Priority, Role, Transition};

pub const MAX_RECIPIENTS: usize = 50;
pub const MIN_BODY_CHARS: usize = 10;

pub const MAX_THREAD_DEPTH: usize = 5;
pub const MAX_REPLIES_PER_MEMO: usize = 50;
pub const MAX_REPLY_WINDOW_DAYS: i64 = 90;
pub const THREAD_WALK_CEILING: usize = 1000;

pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_TOTAL_ATTACHMENT_BYTES: u64 = 50 * 1024 * 1024;
pub const ALLOWED_ATTACHMENT_EXTENSIONS: &[&str] =
    &["pdf", "doc", "docx", "xls", "xlsx", "png", "jpg", "jpeg"];
