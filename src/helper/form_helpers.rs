use actix_multipart::Multipart;
use actix_web::{web, web::BytesMut, HttpMessage, HttpRequest};
use futures_util::StreamExt;

use crate::errors::ContentError;
use crate::helper::media_helpers::{mime_to_safe_extension, MediaError, MediaStore};
use crate::models::post_payload::PostForm;

/// Cap on JSON bodies and on the combined text parts of a multipart body.
pub const MAX_TEXT_BODY_BYTES: usize = 2 * 1024 * 1024;

struct PendingImage {
    bytes: Vec<u8>,
    mime_type: String,
}

fn body_error(message: impl Into<String>) -> ContentError {
    ContentError::invalid("body", message)
}

async fn read_json_form(mut payload: web::Payload) -> Result<PostForm, ContentError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| body_error(format!("Could not read request body: {}", e)))?;
        if body.len() + chunk.len() > MAX_TEXT_BODY_BYTES {
            return Err(body_error("Request body is too large."));
        }
        body.extend_from_slice(&chunk);
    }
    serde_json::from_slice(&body).map_err(|e| body_error(format!("Invalid JSON: {}", e)))
}

async fn read_multipart_form(
    mut payload: Multipart,
    max_image_bytes: usize,
) -> Result<(PostForm, Option<PendingImage>), ContentError> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut text_bytes = 0usize;
    let mut image: Option<PendingImage> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| body_error(format!("Malformed multipart body: {}", e)))?;
        let field_name = field.content_disposition().get_name().unwrap_or_default().to_string();

        if field_name == "image" {
            // Browsers send an empty part when no file was chosen.
            if field.content_disposition().get_filename() == Some("") {
                while field.next().await.is_some() {}
                continue;
            }
            if image.is_some() {
                return Err(ContentError::invalid("image", "Only one image may be uploaded."));
            }
            let mime_type = field.content_type().map(|m| m.essence_str().to_string()).unwrap_or_default();
            if mime_to_safe_extension(&mime_type).is_none() {
                return Err(MediaError::UnsupportedType(mime_type).into());
            }

            let mut data = BytesMut::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| body_error(format!("Could not read image: {}", e)))?;
                if data.len() + chunk.len() > max_image_bytes {
                    return Err(MediaError::TooLarge(max_image_bytes).into());
                }
                data.extend_from_slice(&chunk);
            }
            if !data.is_empty() {
                image = Some(PendingImage { bytes: data.to_vec(), mime_type });
            }
            continue;
        }

        let mut data = BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| body_error(format!("Could not read form field: {}", e)))?;
            text_bytes += chunk.len();
            if text_bytes > MAX_TEXT_BODY_BYTES {
                return Err(body_error("Request body is too large."));
            }
            data.extend_from_slice(&chunk);
        }
        let value = String::from_utf8(data.to_vec())
            .map_err(|_| ContentError::invalid(&field_name, "Invalid UTF-8 in form field."))?;
        fields.push((field_name, value));
    }

    Ok((PostForm::from_fields(fields)?, image))
}

/// Reads a post body sent either as JSON or as `multipart/form-data`.
///
/// The whole body is parsed before anything is written, so a malformed
/// request never leaves a file behind. An `image` part is then handed to
/// the media store and its public path returned alongside the form.
pub async fn read_post_form(
    req: &HttpRequest,
    payload: web::Payload,
    media: &web::Data<dyn MediaStore>,
) -> Result<(PostForm, Option<String>), ContentError> {
    let content_type = req.content_type().to_ascii_lowercase();

    if content_type == "application/json" {
        return Ok((read_json_form(payload).await?, None));
    }
    if content_type != "multipart/form-data" {
        return Err(body_error("Send the post as application/json or multipart/form-data."));
    }

    let multipart = Multipart::new(req.headers(), payload);
    let (form, pending) = read_multipart_form(multipart, media.max_bytes()).await?;

    let image = match pending {
        Some(PendingImage { bytes, mime_type }) => {
            let media = media.clone();
            let path = web::block(move || media.store(&bytes, &mime_type)).await??;
            Some(path)
        }
        None => None,
    };
    Ok((form, image))
}
