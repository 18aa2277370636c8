/**
 * Upload helpers
 * Validation and disk storage shared by the project, resource, and feedback
 * routes. Files land under uploads/<kind>/ with generated names and are
 * served back at /uploads/<kind>/<file>.
 */
use axum::extract::Multipart;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

pub const UPLOAD_ROOT: &str = "uploads";

const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const MAX_DOCUMENT_SIZE: usize = 10 * 1024 * 1024; // 10MB

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "zip", "txt", "md", "js", "py", "rs", "java", "cpp", "html", "css",
];

/// A file successfully written to disk
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub url: String,
    pub filename: String,
    pub size: usize,
    pub file_type: String,
}

/// Upload rejection, surfaced to clients as a 400
#[derive(Debug)]
pub struct UploadError(pub String);

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn extension_of(filename: &str) -> String {
    filename.rsplit('.').next().unwrap_or("").to_lowercase()
}

pub fn validate_image_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: 52 49 46 46 ... 57 45 42 50
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn get_extension_from_mime(mime: &str) -> &str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn sanitize_filename(filename: &str) -> bool {
    // Reject path traversal and special characters
    !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains('\0')
}

async fn write_file(dir: &str, ext: &str, bytes: &[u8]) -> Result<StoredFile, UploadError> {
    let upload_path = PathBuf::from(UPLOAD_ROOT).join(dir);
    if let Err(e) = tokio::fs::create_dir_all(&upload_path).await {
        tracing::error!("Failed to create upload directory: {}", e);
        return Err(UploadError("Failed to initialize upload directory".to_string()));
    }

    let filename = format!("{}.{}", Uuid::new_v4(), ext);
    let file_path = upload_path.join(&filename);

    if let Err(e) = tokio::fs::write(&file_path, bytes).await {
        tracing::error!("Failed to write upload file: {}", e);
        return Err(UploadError("Failed to save file".to_string()));
    }

    tracing::info!("File uploaded: {}/{} ({} bytes)", dir, filename, bytes.len());

    Ok(StoredFile {
        url: format!("/{}/{}/{}", UPLOAD_ROOT, dir, filename),
        filename,
        size: bytes.len(),
        file_type: ext.to_string(),
    })
}

/// Validate and store an image upload. Extension and magic bytes must both
/// pass; nothing is written on rejection.
pub async fn store_image(
    dir: &str,
    original_name: &str,
    bytes: &[u8],
) -> Result<StoredFile, UploadError> {
    let ext = extension_of(original_name);
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(UploadError(
            "Unsupported file type. Allowed: JPEG, PNG, WebP, GIF.".to_string(),
        ));
    }
    if bytes.is_empty() {
        return Err(UploadError("Empty file".to_string()));
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(UploadError("File too large. Maximum size is 5MB.".to_string()));
    }
    let mime = match validate_image_magic_bytes(bytes) {
        Some(m) => m,
        None => {
            return Err(UploadError(
                "File content does not match an allowed image type.".to_string(),
            ));
        }
    };

    write_file(dir, get_extension_from_mime(mime), bytes).await
}

/// Validate and store a document upload (resources, feedback attachments).
pub async fn store_document(
    dir: &str,
    original_name: &str,
    bytes: &[u8],
) -> Result<StoredFile, UploadError> {
    let ext = extension_of(original_name);
    if !DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        return Err(UploadError("Invalid file type.".to_string()));
    }
    if bytes.is_empty() {
        return Err(UploadError("Empty file".to_string()));
    }
    if bytes.len() > MAX_DOCUMENT_SIZE {
        return Err(UploadError("File too large. Maximum size is 10MB.".to_string()));
    }

    write_file(dir, &ext, bytes).await
}

/// One file part of a multipart form
#[derive(Debug)]
pub struct FormFile {
    pub field: String,
    pub filename: String,
    pub bytes: axum::body::Bytes,
}

/// A fully-read multipart form: text fields by name, file parts in order
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<FormFile>,
}

impl MultipartForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str()).filter(|s| !s.trim().is_empty())
    }

    pub fn file(&self, name: &str) -> Option<&FormFile> {
        self.files.iter().find(|f| f.field == name)
    }
}

/// Drain a multipart request into memory. Parts with a filename become
/// [`FormFile`]s, everything else a text field.
pub async fn collect_multipart(mut multipart: Multipart) -> Result<MultipartForm, UploadError> {
    let mut form = MultipartForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Multipart error: {}", e);
                return Err(UploadError("Invalid multipart data".to_string()));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        if let Some(filename) = field.file_name().map(|s| s.to_string()) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| {
                    tracing::error!("Failed to read upload bytes: {}", e);
                    UploadError("Failed to read file data".to_string())
                })?;
            form.files.push(FormFile {
                field: name,
                filename,
                bytes,
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|_| UploadError("Invalid multipart data".to_string()))?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

/// Resolve a stored /uploads/... URL back to its on-disk path. Returns None
/// for anything that does not point inside the upload root.
pub fn disk_path_for_url(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix(&format!("/{}/", UPLOAD_ROOT))?;
    let (dir, filename) = rest.split_once('/')?;
    if !sanitize_filename(filename) || !sanitize_filename(dir) {
        return None;
    }
    Some(PathBuf::from(UPLOAD_ROOT).join(dir).join(filename))
}

/// Delete the file behind a stored URL. Entity deletion calls this; a file
/// already gone is logged and ignored.
pub async fn delete_by_url(url: &str) {
    let path = match disk_path_for_url(url) {
        Some(p) => p,
        None => {
            tracing::warn!("Refusing to delete non-upload path: {}", url);
            return;
        }
    };

    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::info!("Deleted upload: {}", url),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Upload already missing: {}", url);
        }
        Err(e) => tracing::error!("Failed to delete upload {}: {}", url, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes_detects_png_and_jpeg() {
        assert_eq!(
            validate_image_magic_bytes(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]),
            Some("image/png")
        );
        assert_eq!(
            validate_image_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some("image/jpeg")
        );
    }

    #[test]
    fn test_magic_bytes_rejects_unknown_and_short_input() {
        assert_eq!(validate_image_magic_bytes(b"GIF"), None);
        assert_eq!(validate_image_magic_bytes(b"%PDF-1.7 ..."), None);
    }

    #[test]
    fn test_disk_path_for_url_maps_inside_upload_root() {
        let path = disk_path_for_url("/uploads/projects/abc.png").unwrap();
        assert_eq!(path, PathBuf::from("uploads").join("projects").join("abc.png"));
    }

    #[test]
    fn test_disk_path_for_url_rejects_traversal_and_foreign_paths() {
        assert!(disk_path_for_url("/uploads/projects/../../etc/passwd").is_none());
        assert!(disk_path_for_url("/etc/passwd").is_none());
        assert!(disk_path_for_url("https://cdn.example.com/x.png").is_none());
    }

    #[tokio::test]
    async fn test_store_image_rejects_wrong_extension() {
        let err = store_image("projects", "notes.txt", &[0x89, 0x50, 0x4E, 0x47])
            .await
            .unwrap_err();
        assert!(err.0.contains("Unsupported file type"));
    }

    #[tokio::test]
    async fn test_store_image_rejects_mismatched_content() {
        let err = store_image("projects", "fake.png", b"plain text, not an image")
            .await
            .unwrap_err();
        assert!(err.0.contains("does not match"));
    }

    #[tokio::test]
    async fn test_store_document_rejects_unknown_extension() {
        let err = store_document("resources", "tool.exe", b"MZ....")
            .await
            .unwrap_err();
        assert!(err.0.contains("Invalid file type"));
    }
}
