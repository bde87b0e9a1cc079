//! Tag backup file
//!
//! UTF-8 with a byte-order mark, one `"<id>","<record>"` line per tag.
//! Restore also accepts files written without a BOM, which are read as
//! Latin-1.

use super::store::TagStore;
use crate::error::Result;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

pub const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Delimiter around ids and records
pub const OUTER_DELIMITER: char = '"';

/// Lines longer than this are not valid backup lines
const MAX_LINE_LEN: usize = 290;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub imported: usize,
    pub invalid: usize,
}

pub fn render_backup(entries: &[(String, String)]) -> Vec<u8> {
    let mut out = BOM.to_vec();
    let d = OUTER_DELIMITER;
    for (id, value) in entries {
        out.extend_from_slice(format!("{d}{id}{d},{d}{value}{d}\n").as_bytes());
    }
    out
}

/// Replace `path` with a fresh backup of `entries`
///
/// Written to a sibling file first and renamed into place so readers never
/// see a half-written backup.
pub async fn write_backup(path: &Path, entries: &[(String, String)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, render_backup(entries)).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

/// Decode one line into `(id, record)`
///
/// Tokens between delimiters are taken in order, skipping separators. The id
/// must be numeric and the record must start with `#`.
pub fn parse_line(line: &str) -> Option<(String, String)> {
    let mut tokens = line
        .split(OUTER_DELIMITER)
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != ",");

    let id = tokens.next()?;
    let value = tokens.next()?;
    let id_ok = id.chars().all(|c| c.is_ascii_digit());
    let value_ok = value.starts_with(super::INNER_DELIMITER);
    (id_ok && value_ok).then(|| (id.to_string(), value.to_string()))
}

/// Text of a backup file, transcoding from Latin-1 when there is no BOM
pub fn decode_text(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&BOM) {
        Some(rest) => String::from_utf8_lossy(rest).into_owned(),
        None => bytes.iter().map(|&b| b as char).collect(),
    }
}

pub(crate) async fn restore_from_file(store: &TagStore, path: &Path) -> Result<RestoreSummary> {
    let bytes = tokio::fs::read(path).await?;
    let has_bom = bytes.starts_with(&BOM);
    debug!(
        "Restoring tags from {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        if has_bom { "UTF-8" } else { "Latin-1" }
    );

    let text = decode_text(&bytes);
    let mut summary = RestoreSummary::default();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match (line.len() <= MAX_LINE_LEN).then(|| parse_line(line)).flatten() {
            Some((id, value)) => {
                store.put_raw(&id, &value).await?;
                summary.imported += 1;
            }
            None => {
                debug!("Invalid backup line: {}", line);
                summary.invalid += 1;
            }
        }
    }

    info!(
        "Restore finished: {} tags imported, {} invalid lines",
        summary.imported, summary.invalid
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagRecord;
    use tagdeck_common::db::init_memory_database;
    use tempfile::TempDir;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("\"1234\",\"#/music/a.mp3#0#1#0\""),
            Some(("1234".into(), "#/music/a.mp3#0#1#0".into()))
        );
        assert_eq!(parse_line("\"abc\",\"#/a.mp3#0#1#0\""), None);
        assert_eq!(parse_line("\"1234\",\"/a.mp3\""), None);
        assert_eq!(parse_line("\"1234\""), None);
    }

    #[test]
    fn test_latin1_transcode() {
        assert_eq!(decode_text(&[b'M', 0xFC, b'h', b'l', b'e']), "Mühle");
        let mut utf8 = BOM.to_vec();
        utf8.extend_from_slice("Mühle".as_bytes());
        assert_eq!(decode_text(&utf8), "Mühle");
    }

    #[tokio::test]
    async fn test_restore_counts_and_removes_file() {
        let dir = TempDir::new().unwrap();
        let pool = init_memory_database().await.unwrap();
        let store = TagStore::new(pool, dir.path().join("backup.txt"));

        let upload = dir.path().join("_1700000000000");
        let mut content = vec![b'"', b'1', b'"', b',', b'"', b'#', b'/', 0xE4, b'.', b'm', b'p', b'3'];
        content.extend_from_slice(b"#0#1#0\"\r\n");
        content.extend_from_slice(b"garbage line\n");
        content.extend_from_slice(b"\"2\",\"#0#0#110#0\"\n");
        tokio::fs::write(&upload, &content).await.unwrap();

        let summary = store.restore(&upload).await.unwrap();
        assert_eq!(summary, RestoreSummary { imported: 2, invalid: 1 });
        assert!(!upload.exists());

        assert_eq!(
            store.lookup("1").await.unwrap(),
            Some(TagRecord::music("/ä.mp3", tagdeck_common::PlayMode::SingleTrack))
        );
        assert_eq!(
            store.lookup("2").await.unwrap(),
            Some(TagRecord::Module { mod_id: 110 })
        );
    }
}
