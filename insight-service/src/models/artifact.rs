use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Declared media kind of an uploaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Slideshow,
    Pdf,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Image,
        ArtifactKind::Slideshow,
        ArtifactKind::Pdf,
    ];

    /// Paged kinds must go through the renderer before they can be analyzed.
    pub fn is_paged(self) -> bool {
        !matches!(self, ArtifactKind::Image)
    }

    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Image => &[
                "image/jpeg",
                "image/png",
                "image/webp",
                "image/bmp",
                "image/gif",
            ],
            ArtifactKind::Slideshow => &[
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "application/vnd.ms-powerpoint",
            ],
            ArtifactKind::Pdf => &["application/pdf"],
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Image => &["jpg", "jpeg", "png", "webp", "bmp", "gif"],
            ArtifactKind::Slideshow => &["pptx", "ppt"],
            ArtifactKind::Pdf => &["pdf"],
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ArtifactKind::Image => "Single image (form or currency photo)",
            ArtifactKind::Slideshow => "PowerPoint presentation",
            ArtifactKind::Pdf => "Portable Document Format",
        }
    }

    /// Resolves a declared kind. Accepts a kind name, a MIME type, a bare
    /// extension or a file name.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let declared = declared.trim().to_lowercase();
        if declared.is_empty() {
            return None;
        }

        match declared.as_str() {
            "image" => return Some(ArtifactKind::Image),
            "slideshow" | "slides" | "presentation" => return Some(ArtifactKind::Slideshow),
            "pdf" => return Some(ArtifactKind::Pdf),
            _ => {}
        }

        // Parameters such as "; charset=binary" are irrelevant for the kind.
        let mime = declared.split(';').next().unwrap_or_default().trim();
        if let Some(kind) = Self::ALL
            .into_iter()
            .find(|kind| kind.mime_types().contains(&mime))
        {
            return Some(kind);
        }

        let extension = declared.rsplit('.').next().unwrap_or_default();
        Self::ALL
            .into_iter()
            .find(|kind| kind.extensions().contains(&extension))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Slideshow => "slideshow",
            ArtifactKind::Pdf => "pdf",
        };
        f.write_str(name)
    }
}

/// Handle to a staged artifact. The bytes themselves stay in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactRef {
    pub id: Uuid,
    pub kind: ArtifactKind,
    /// Hex SHA-256 of the payload.
    pub digest: String,
    pub size: usize,
}

/// Image bytes of one analyzable unit. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct UnitImage {
    pub bytes: Arc<Vec<u8>>,
    pub mime_type: String,
}

impl UnitImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// MIME type of an image payload, from its magic bytes.
pub fn image_mime_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// One page produced by the renderer.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: UnitImage,
    /// Text layer of the page, when the source document has one.
    pub text: Option<String>,
}
