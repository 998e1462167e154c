// Append-only map from file content fingerprints to remote document ids.
//
// Each record is one line: the 32 hex character fingerprint immediately
// followed by the document id. Records are never rewritten; when the same
// content is uploaded twice the first record wins on lookup.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{OpenError, OpenResult};

/// Width of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 32;

/// MD5 digest of a file's bytes, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash everything readable from `reader`.
    pub fn from_reader<R: Read>(mut reader: R) -> OpenResult<Self> {
        let mut context = md5::Context::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            context.consume(&buf[..n]);
        }
        Ok(Self(format!("{:x}", context.compute())))
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", md5::compute(bytes)))
    }

    /// Accept an existing fingerprint string, checking its shape.
    pub fn parse(s: &str) -> OpenResult<Self> {
        if s.len() != FINGERPRINT_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OpenError::InvalidEntry(format!(
                "fingerprint must be {FINGERPRINT_LEN} hex characters, got {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint the content of the file at `path`.
pub fn fingerprint(path: &Path) -> OpenResult<Fingerprint> {
    let file = File::open(path)?;
    Fingerprint::from_reader(BufReader::new(file))
}

/// One cache record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub document_id: String,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, document_id: impl Into<String>) -> OpenResult<Self> {
        let document_id = document_id.into();
        if document_id.is_empty() {
            return Err(OpenError::InvalidEntry("empty document id".into()));
        }
        if document_id.contains(&['\n', '\r'][..]) {
            return Err(OpenError::InvalidEntry(format!(
                "document id contains a line break: {document_id:?}"
            )));
        }
        Ok(Self {
            fingerprint,
            document_id,
        })
    }

    /// Parse a line without its terminator.
    pub fn parse_line(line: &str) -> OpenResult<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.len() <= FINGERPRINT_LEN || !line.is_char_boundary(FINGERPRINT_LEN) {
            return Err(OpenError::InvalidEntry(format!("record too short: {line:?}")));
        }
        let (fp, id) = line.split_at(FINGERPRINT_LEN);
        Self::new(Fingerprint::parse(fp)?, id)
    }

    /// Serialized form, newline included.
    pub fn to_line(&self) -> String {
        format!("{}{}\n", self.fingerprint, self.document_id)
    }
}

/// Flat-file cache store. There is no locking; two concurrent invocations may
/// both miss and both append.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First document id recorded for `fingerprint`. Read failures are logged
    /// and reported as a miss.
    pub fn find(&self, fingerprint: &Fingerprint) -> Option<String> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = ?self.path, error = %e, "Cache file not readable");
                return None;
            }
        };

        let mut found = None;
        let scanned = scan_records(BufReader::new(file), |entry| {
            if entry.fingerprint != *fingerprint {
                return true;
            }
            found = Some(entry.document_id);
            false
        });
        if let Err(e) = scanned {
            warn!(path = ?self.path, error = %e, "Cache read failed");
            return None;
        }

        if let Some(id) = &found {
            debug!(fingerprint = %fingerprint, id = %id, "Cache hit");
        }
        found
    }

    /// Append one record with a single write.
    pub fn append(&self, entry: &CacheEntry) -> OpenResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(entry.to_line().as_bytes())?;

        debug!(fingerprint = %entry.fingerprint, id = %entry.document_id, "Cached document id");
        Ok(())
    }

    /// All well-formed records in file order.
    pub fn entries(&self) -> OpenResult<Vec<CacheEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        scan_records(BufReader::new(file), |entry| {
            entries.push(entry);
            true
        })?;
        Ok(entries)
    }
}

/// Feed each well-formed record to `visit` until it returns `false`. Lines
/// that are not UTF-8 or do not parse are logged and skipped; only an I/O
/// error ends the scan early.
fn scan_records<R: BufRead>(
    mut reader: R,
    mut visit: impl FnMut(CacheEntry) -> bool,
) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut index = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        index += 1;

        let line = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let parsed = std::str::from_utf8(line)
            .map_err(|e| OpenError::InvalidEntry(format!("record is not UTF-8: {e}")))
            .and_then(CacheEntry::parse_line);
        match parsed {
            Ok(entry) => {
                if !visit(entry) {
                    return Ok(());
                }
            }
            Err(e) => warn!(line = index, error = %e, "Skipping malformed cache record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache() -> (FileCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::with_path(dir.path().join("filelist"));
        (cache, dir)
    }

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::of_bytes(&[byte])
    }

    #[test]
    fn test_fingerprint_ignores_name_and_location() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("report.docx");
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let b = dir.path().join("sub").join("copy of report.docx");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_differs_for_different_content() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.docx");
        let b = dir.path().join("b.docx");
        std::fs::write(&a, b"one").unwrap();
        std::fs::write(&b, b"two").unwrap();

        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.doc");
        std::fs::write(&path, b"").unwrap();

        let fp = fingerprint(&path).unwrap();
        assert_eq!(fp.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_fingerprint_missing_file_errors() {
        assert!(fingerprint(Path::new("/definitely/not/here.docx")).is_err());
    }

    #[test]
    fn test_streamed_matches_in_memory() {
        let data = vec![7u8; 200_000];
        let streamed = Fingerprint::from_reader(&data[..]).unwrap();
        assert_eq!(streamed, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn test_append_then_find() {
        let (cache, _dir) = test_cache();
        cache.append(&CacheEntry::new(fp(1), "id-one").unwrap()).unwrap();
        cache.append(&CacheEntry::new(fp(2), "id-two").unwrap()).unwrap();
        cache.append(&CacheEntry::new(fp(3), "id-three").unwrap()).unwrap();

        assert_eq!(cache.find(&fp(2)).as_deref(), Some("id-two"));
        assert_eq!(cache.find(&fp(3)).as_deref(), Some("id-three"));
    }

    #[test]
    fn test_find_unknown_is_none() {
        let (cache, _dir) = test_cache();
        assert_eq!(cache.find(&fp(9)), None);

        cache.append(&CacheEntry::new(fp(1), "id-one").unwrap()).unwrap();
        assert_eq!(cache.find(&fp(9)), None);
    }

    #[test]
    fn test_first_match_wins() {
        let (cache, _dir) = test_cache();
        cache.append(&CacheEntry::new(fp(1), "first").unwrap()).unwrap();
        cache.append(&CacheEntry::new(fp(1), "second").unwrap()).unwrap();

        assert_eq!(cache.find(&fp(1)).as_deref(), Some("first"));
        assert_eq!(cache.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let (cache, _dir) = test_cache();
        let upper = fp(1).as_str().to_ascii_uppercase();
        std::fs::write(cache.path(), format!("{upper}shouting\n")).unwrap();

        assert_eq!(cache.find(&fp(1)), None);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (cache, _dir) = test_cache();
        let good = fp(4);
        let content = format!(
            "short\n{}\nzz{}broken\n{}real-id\n",
            fp(5),
            &fp(6).as_str()[2..],
            good
        );
        std::fs::write(cache.path(), content).unwrap();

        assert_eq!(cache.find(&good).as_deref(), Some("real-id"));
        assert_eq!(cache.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_undecodable_line_does_not_hide_later_records() {
        let (cache, _dir) = test_cache();
        let mut content = b"\xff\xfe corrupted record\n".to_vec();
        content.extend_from_slice(format!("{}real-id\n", fp(4)).as_bytes());
        std::fs::write(cache.path(), content).unwrap();

        assert_eq!(cache.find(&fp(4)).as_deref(), Some("real-id"));
        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].document_id, "real-id");

        cache.append(&CacheEntry::new(fp(5), "later").unwrap()).unwrap();
        assert_eq!(cache.find(&fp(5)).as_deref(), Some("later"));
    }

    #[test]
    fn test_last_record_without_newline() {
        let (cache, _dir) = test_cache();
        std::fs::write(cache.path(), format!("{}tail-id", fp(1))).unwrap();
        assert_eq!(cache.find(&fp(1)).as_deref(), Some("tail-id"));
    }

    #[test]
    fn test_crlf_records() {
        let (cache, _dir) = test_cache();
        std::fs::write(cache.path(), format!("{}windows-id\r\n", fp(1))).unwrap();
        assert_eq!(cache.find(&fp(1)).as_deref(), Some("windows-id"));
    }

    #[test]
    fn test_append_writes_one_line() {
        let (cache, _dir) = test_cache();
        cache.append(&CacheEntry::new(fp(1), "abc").unwrap()).unwrap();

        let content = std::fs::read_to_string(cache.path()).unwrap();
        assert_eq!(content, format!("{}abc\n", fp(1)));
    }

    #[test]
    fn test_entry_validation() {
        assert!(CacheEntry::new(fp(1), "").is_err());
        assert!(CacheEntry::new(fp(1), "a\nb").is_err());
        assert!(Fingerprint::parse("abc").is_err());
        assert!(Fingerprint::parse(&"g".repeat(FINGERPRINT_LEN)).is_err());
        assert!(Fingerprint::parse(fp(1).as_str()).is_ok());
    }

    #[test]
    fn test_entries_on_missing_file() {
        let (cache, _dir) = test_cache();
        assert!(cache.entries().unwrap().is_empty());
    }
}
