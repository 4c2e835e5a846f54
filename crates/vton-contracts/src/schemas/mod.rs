pub mod fields;
mod shapes;

pub use fields::{ArtifactField, ErrorField, JobIdField, StatusField, UploadUrlField};
pub use shapes::{
    classify_poll, classify_submit, classify_upload, Envelope, PollShape, SubmitShape,
    UploadReply,
};
