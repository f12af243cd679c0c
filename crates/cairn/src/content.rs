//! Content validation.
//!
//! Every record submission passes through [`verify_content`] before any
//! repository work happens: metadata stream ids are bounded and unique,
//! filenames are bare sanitized basenames, payload digests and MIME
//! declarations must match what the payload actually is.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use cairn_core::digest::sha256;
use cairn_core::error::{CairnError, ContentErrorCode, Result};
use cairn_core::types::{File, MetadataStream, METADATA_STREAMS_MAX};

/// MIME types a record file may carry.
pub const SUPPORTED_MIME_TYPES: &[&str] =
    &["text/plain; charset=utf-8", "image/png", "image/jpeg"];

/// A validated file with its payload decoded and digest checked.
#[derive(Debug, Clone)]
pub(crate) struct CookedFile {
    pub name: String,
    pub digest: [u8; 32],
    pub payload: Vec<u8>,
}

/// Sniff the MIME type of a payload from its leading bytes.
pub fn detect_mime(payload: &[u8]) -> String {
    if payload.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png".to_string();
    }
    if payload.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg".to_string();
    }
    let printable = !payload.is_empty()
        && std::str::from_utf8(payload).is_ok_and(|s| {
            s.chars()
                .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        });
    if printable {
        return "text/plain; charset=utf-8".to_string();
    }
    "application/octet-stream".to_string()
}

/// Whether `mime` is on the whitelist.
pub fn mime_valid(mime: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime)
}

/// Strip every character outside `[A-Za-z0-9._-]`. Filenames must equal
/// their sanitized form.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

fn is_bare_basename(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name().map(|f| f == name).unwrap_or(false)
}

/// Validate a submission and cook its files.
///
/// `files_del` names files slated for deletion; they participate in the
/// duplicate-filename check. The check order matches the error surface
/// clients rely on: metadata ids, filenames, emptiness, duplicates, then
/// per-file digest/base64/MIME checks.
pub(crate) fn verify_content(
    streams: &[MetadataStream],
    files: &[File],
    files_del: &[String],
) -> Result<Vec<CookedFile>> {
    for stream in streams {
        if stream.id > METADATA_STREAMS_MAX - 1 {
            return Err(CairnError::content(
                ContentErrorCode::InvalidMetadataId,
                &[&stream.id.to_string()],
            ));
        }
    }
    for (i, a) in streams.iter().enumerate() {
        for (j, b) in streams.iter().enumerate() {
            if i == j || a.id != b.id {
                continue;
            }
            return Err(CairnError::content(
                ContentErrorCode::DuplicateMetadataId,
                &[&a.id.to_string()],
            ));
        }
    }

    for file in files {
        if !is_bare_basename(&file.name) {
            return Err(CairnError::content(
                ContentErrorCode::InvalidFilename,
                &[&file.name],
            ));
        }
    }
    for name in files_del {
        if !is_bare_basename(name) {
            return Err(CairnError::content(
                ContentErrorCode::InvalidFilename,
                &[name],
            ));
        }
    }

    if files.is_empty() {
        return Err(CairnError::content(ContentErrorCode::Empty, &[]));
    }

    for (i, a) in files.iter().enumerate() {
        for (j, b) in files.iter().enumerate() {
            if i != j && a.name == b.name {
                return Err(CairnError::content(
                    ContentErrorCode::DuplicateFilename,
                    &[&a.name],
                ));
            }
        }
        if files_del.contains(&a.name) {
            return Err(CairnError::content(
                ContentErrorCode::DuplicateFilename,
                &[&a.name],
            ));
        }
    }

    let mut cooked = Vec::with_capacity(files.len());
    for file in files {
        if sanitize(&file.name) != file.name {
            return Err(CairnError::content(
                ContentErrorCode::InvalidFilename,
                &[&file.name],
            ));
        }

        let declared: [u8; 32] = match hex::decode(&file.digest)
            .ok()
            .and_then(|d| d.try_into().ok())
        {
            Some(d) => d,
            None => {
                return Err(CairnError::content(
                    ContentErrorCode::InvalidFileDigest,
                    &[&file.name],
                ))
            }
        };

        let payload = BASE64.decode(&file.payload).map_err(|_| {
            CairnError::content(ContentErrorCode::InvalidBase64, &[&file.name])
        })?;

        let digest = sha256(&payload);
        if digest != declared {
            return Err(CairnError::content(
                ContentErrorCode::InvalidFileDigest,
                &[&file.name],
            ));
        }

        let detected = detect_mime(&payload);
        if detected != file.mime {
            return Err(CairnError::content(
                ContentErrorCode::InvalidMimeType,
                &[&file.name, &detected],
            ));
        }
        if !mime_valid(&file.mime) {
            return Err(CairnError::content(
                ContentErrorCode::UnsupportedMimeType,
                &[&file.name, &file.mime],
            ));
        }

        cooked.push(CookedFile {
            name: file.name.clone(),
            digest,
            payload,
        });
    }

    Ok(cooked)
}

/// Load a file from disk into its transport form, detecting its MIME type
/// and recomputing its digest.
pub(crate) fn load_file(path: &Path) -> Result<File> {
    let name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .ok_or_else(|| CairnError::Corrupt(format!("bad payload path: {}", path.display())))?;
    let payload = std::fs::read(path)?;
    Ok(File {
        name,
        mime: detect_mime(&payload),
        digest: hex::encode(sha256(&payload)),
        payload: BASE64.encode(&payload),
    })
}

/// Build a transport-form [`File`] from raw bytes; handy for clients and
/// tests.
pub fn file_from_bytes(name: &str, payload: &[u8]) -> File {
    File {
        name: name.to_string(),
        mime: detect_mime(payload),
        digest: hex::encode(sha256(payload)),
        payload: BASE64.encode(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: u64, payload: &str) -> MetadataStream {
        MetadataStream {
            id,
            payload: payload.to_string(),
        }
    }

    fn code_of(err: CairnError) -> ContentErrorCode {
        match err {
            CairnError::ContentVerification { code, .. } => code,
            other => panic!("expected content error, got {other}"),
        }
    }

    #[test]
    fn test_valid_submission() {
        let files = vec![file_from_bytes("a.txt", b"x\n")];
        let cooked = verify_content(&[stream(1, "hello")], &files, &[]).unwrap();
        assert_eq!(cooked.len(), 1);
        assert_eq!(cooked[0].payload, b"x\n");
        assert_eq!(cooked[0].digest, sha256(b"x\n"));
    }

    #[test]
    fn test_empty_files_rejected() {
        let err = verify_content(&[], &[], &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::Empty);
    }

    #[test]
    fn test_metadata_id_bounds() {
        let files = vec![file_from_bytes("a.txt", b"x\n")];
        let err =
            verify_content(&[stream(METADATA_STREAMS_MAX, "over")], &files, &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::InvalidMetadataId);
    }

    #[test]
    fn test_duplicate_metadata_id() {
        let files = vec![file_from_bytes("a.txt", b"x\n")];
        let err =
            verify_content(&[stream(1, "one"), stream(1, "two")], &files, &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::DuplicateMetadataId);
    }

    #[test]
    fn test_duplicate_filename() {
        let files = vec![
            file_from_bytes("a.txt", b"x\n"),
            file_from_bytes("a.txt", b"y\n"),
        ];
        let err = verify_content(&[], &files, &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::DuplicateFilename);
    }

    #[test]
    fn test_filename_collides_with_deletion() {
        let files = vec![file_from_bytes("a.txt", b"x\n")];
        let err = verify_content(&[], &files, &["a.txt".to_string()]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::DuplicateFilename);
    }

    #[test]
    fn test_path_separator_rejected() {
        let files = vec![file_from_bytes("dir/a.txt", b"x\n")];
        let err = verify_content(&[], &files, &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::InvalidFilename);
    }

    #[test]
    fn test_unsanitary_filename_rejected() {
        let files = vec![file_from_bytes("a b.txt", b"x\n")];
        let err = verify_content(&[], &files, &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::InvalidFilename);
    }

    #[test]
    fn test_digest_mismatch() {
        let mut file = file_from_bytes("a.txt", b"x\n");
        file.digest = hex::encode(sha256(b"something else"));
        let err = verify_content(&[], &[file], &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::InvalidFileDigest);
    }

    #[test]
    fn test_bad_base64() {
        let mut file = file_from_bytes("a.txt", b"x\n");
        file.payload = "not base64!!!".to_string();
        let err = verify_content(&[], &[file], &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::InvalidBase64);
    }

    #[test]
    fn test_mime_mismatch() {
        let mut file = file_from_bytes("a.txt", b"x\n");
        file.mime = "image/png".to_string();
        let err = verify_content(&[], &[file], &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::InvalidMimeType);
    }

    #[test]
    fn test_unsupported_mime() {
        // A PDF header sniffs as octet-stream, which is not whitelisted.
        let file = file_from_bytes("a.pdf", b"%PDF-1.4\x00");
        let err = verify_content(&[], &[file], &[]).unwrap_err();
        assert_eq!(code_of(err), ContentErrorCode::UnsupportedMimeType);
    }

    #[test]
    fn test_detect_mime() {
        assert_eq!(detect_mime(b"plain text\n"), "text/plain; charset=utf-8");
        assert_eq!(detect_mime(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(detect_mime(&[0xff, 0xd8, 0xff, 0xe0]), "image/jpeg");
        assert_eq!(detect_mime(&[0x00, 0x01]), "application/octet-stream");
    }
}
