//! CRX package unpacking.
//!
//! A CRX is a zip archive behind a `Cr24` header. Version 2 headers carry the
//! public key and signature lengths; version 3 headers carry one protobuf
//! header length. Plain zip files are accepted as-is.

use std::io::Cursor;
use std::path::Path;

use tracing::debug;

use crate::UpdaterError;

const CRX_MAGIC: &[u8; 4] = b"Cr24";
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

fn read_u32(bytes: &[u8], offset: usize) -> Result<usize, UpdaterError> {
    let field = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| UpdaterError::extract_failed("Truncated CRX header"))?;
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as usize)
}

/// Offset of the zip archive inside `bytes`.
pub fn zip_offset(bytes: &[u8]) -> Result<usize, UpdaterError> {
    if bytes.starts_with(ZIP_MAGIC) {
        return Ok(0);
    }
    if !bytes.starts_with(CRX_MAGIC) {
        return Err(UpdaterError::extract_failed("Not a CRX or zip package"));
    }

    let offset = match read_u32(bytes, 4)? {
        2 => {
            let (key_len, sig_len) = (read_u32(bytes, 8)?, read_u32(bytes, 12)?);
            16usize
                .checked_add(key_len)
                .and_then(|n| n.checked_add(sig_len))
        }
        3 => 12usize.checked_add(read_u32(bytes, 8)?),
        version => {
            return Err(UpdaterError::extract_failed(format!(
                "Unsupported CRX version {}",
                version
            )))
        }
    }
    .ok_or_else(|| UpdaterError::extract_failed("CRX header exceeds package size"))?;

    if offset > bytes.len() {
        return Err(UpdaterError::extract_failed("CRX header exceeds package size"));
    }
    Ok(offset)
}

/// Unpack CRX `bytes` into `dest`, creating it if needed.
pub fn unpack_crx(bytes: &[u8], dest: &Path) -> Result<(), UpdaterError> {
    let offset = zip_offset(bytes)?;
    debug!(offset, dest = %dest.display(), "crx.unpack");

    std::fs::create_dir_all(dest).map_err(|e| {
        UpdaterError::extract_failed(format!("Failed to create {}: {}", dest.display(), e))
    })?;

    let mut archive = zip::ZipArchive::new(Cursor::new(&bytes[offset..]))
        .map_err(|e| UpdaterError::extract_failed(format!("Invalid archive: {}", e)))?;
    archive
        .extract(dest)
        .map_err(|e| UpdaterError::extract_failed(format!("Failed to extract archive: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn sample_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("manifest.json", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(br#"{"name": "Sample", "version": "1.2"}"#)
            .unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn crx3(zip: &[u8]) -> Vec<u8> {
        let header = [0u8; 7];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CRX_MAGIC);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(zip);
        bytes
    }

    fn crx2(zip: &[u8]) -> Vec<u8> {
        let key = [1u8; 5];
        let sig = [2u8; 3];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CRX_MAGIC);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(sig.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&key);
        bytes.extend_from_slice(&sig);
        bytes.extend_from_slice(zip);
        bytes
    }

    #[test]
    fn test_zip_offset() {
        let zip = sample_zip();
        assert_eq!(zip_offset(&zip).unwrap(), 0);
        assert_eq!(zip_offset(&crx3(&zip)).unwrap(), 19);
        assert_eq!(zip_offset(&crx2(&zip)).unwrap(), 24);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(zip_offset(b"hello world").is_err());
        assert!(zip_offset(b"Cr24\x03\x00").is_err());

        let mut bad_version = crx3(&sample_zip());
        bad_version[4] = 9;
        assert!(matches!(
            zip_offset(&bad_version),
            Err(UpdaterError::ExtractFailed { .. })
        ));
    }

    #[test]
    fn test_oversized_header_lengths() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CRX_MAGIC);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            zip_offset(&bytes),
            Err(UpdaterError::ExtractFailed { .. })
        ));

        let mut v3 = crx3(&sample_zip());
        v3[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            zip_offset(&v3),
            Err(UpdaterError::ExtractFailed { .. })
        ));
    }

    #[test]
    fn test_unpack_crx3() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("app");

        unpack_crx(&crx3(&sample_zip()), &dest).unwrap();

        let manifest = std::fs::read_to_string(dest.join("manifest.json")).unwrap();
        assert!(manifest.contains("\"1.2\""));
    }

    #[test]
    fn test_unpack_crx2() {
        let dir = tempfile::tempdir().unwrap();
        unpack_crx(&crx2(&sample_zip()), dir.path()).unwrap();
        assert!(dir.path().join("manifest.json").exists());
    }
}
