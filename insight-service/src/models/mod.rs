mod analysis;
mod artifact;
mod session;

pub use analysis::{
    AnalysisHints, AnalysisPayload, AnalysisProfile, AnalysisResult, AnalysisStatus,
    BoundingBox, Detection, FormField, SpeechClip, TextSpan, UnitVersion,
};
pub use artifact::{image_mime_type, ArtifactKind, ArtifactRef, RenderedPage, UnitImage};
pub use session::{Direction, Navigation, SessionId, SessionView, UnitSource};
