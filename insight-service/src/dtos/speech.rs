use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SpeechRequest {
    #[validate(length(min = 1, max = 5000, message = "Text must be 1-5000 characters"))]
    pub text: String,
    #[validate(length(min = 2, max = 16, message = "Language must be a short language code"))]
    pub language: Option<String>,
}
