pub mod content_helpers;
pub mod form_helpers;
pub mod media_helpers;
pub mod public_helpers;
pub mod sanitization_helpers;
pub mod slug_helpers;
