use std::{
    fs::{File, OpenOptions},
    io::{Read, Write as _},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{error, warn};

use super::StorageError;

/// Append-only file of records, one JSON document per line.
pub(crate) struct Journal<T> {
    file: File,
    path: PathBuf,
    len: u64,
    _record: PhantomData<fn(T)>,
}

impl<T: Serialize + DeserializeOwned> Journal<T> {
    /// Opens (or creates) the journal and returns the records already in it, paired with
    /// their 1-based line numbers.
    pub(crate) fn open(path: &Path) -> Result<(Self, Vec<(usize, T)>), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;

        let mut records = Vec::new();
        let mut complete_len = 0usize;
        let mut rest = content.as_slice();
        let mut line_no = 0usize;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            line_no += 1;
            let (line, tail) = rest.split_at(pos);
            rest = &tail[1..];
            complete_len += pos + 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record = serde_json::from_slice(line).map_err(|err| StorageError::Corrupt {
                line: line_no,
                reason: err.to_string(),
            })?;
            records.push((line_no, record));
        }

        if !rest.is_empty() {
            // a crash mid-append leaves an unterminated line behind
            warn!(
                path = %path.display(),
                bytes = rest.len(),
                "Discarding torn record at the end of the journal"
            );
            file.set_len(complete_len as u64)?;
        }

        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                len: complete_len as u64,
                _record: PhantomData,
            },
            records,
        ))
    }

    pub(crate) fn append(&mut self, record: &T) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        if let Err(err) = self
            .file
            .write_all(&line)
            .and_then(|()| self.file.sync_data())
        {
            if let Err(truncate_err) = self.file.set_len(self.len) {
                error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to roll back a partial journal append"
                );
            }
            return Err(err.into());
        }
        self.len += line.len() as u64;
        Ok(())
    }
}
