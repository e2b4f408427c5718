pub mod copy_blob;

pub use copy_blob::{CopyBlobRequest, CopyBlobResult, CopyOrchestrator, WaitOutcome};
