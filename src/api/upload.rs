//! Attachment upload collaborator
//!
//! Uploads happen before any message exists; a failure here aborts the
//! send with no partial optimistic entry left behind.

use serde::Deserialize;

use crate::api::client::ApiClient;
use crate::error::ChatError;
use crate::models::{Attachment, AttachmentKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    id: i64,
    url: String,
    name: Option<String>,
    size: Option<u64>,
    kind: Option<AttachmentKind>,
}

/// Upload one file, returning the attachment record to carry on a message.
pub async fn upload_attachment(
    client: &ApiClient,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<Attachment, ChatError> {
    let size = bytes.len() as u64;
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);

    let resp = client
        .post_multipart("/v1/attachments", form)
        .await
        .map_err(|e| ChatError::Upload(e.to_string()))?;

    let body: UploadResponse = resp
        .json()
        .await
        .map_err(|e| ChatError::Upload(format!("bad upload response: {}", e)))?;

    Ok(Attachment {
        id: body.id,
        kind: body.kind.unwrap_or_else(|| infer_kind(file_name)),
        url: body.url,
        name: body.name.unwrap_or_else(|| file_name.to_string()),
        size: body.size.unwrap_or(size),
    })
}

fn infer_kind(file_name: &str) -> AttachmentKind {
    let lower = file_name.to_lowercase();
    let image = [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext));
    if image {
        AttachmentKind::Image
    } else {
        AttachmentKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_kind() {
        assert_eq!(infer_kind("shot.PNG"), AttachmentKind::Image);
        assert_eq!(infer_kind("notes.pdf"), AttachmentKind::File);
    }
}
