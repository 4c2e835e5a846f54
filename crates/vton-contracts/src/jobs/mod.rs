mod artifact;
mod asset;
mod handle;
mod request;
mod status;

pub use artifact::{ArtifactRef, PersistedArtifact, ResultArtifact};
pub use asset::{AssetReference, AssetState, AssetStateError};
pub use handle::JobHandle;
pub use request::{Category, JobRequest};
pub use status::{JobState, JobStatus, TransitionError};
