//! Local staging of downloaded ledger files

use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Longest slice of the ledger file name kept in a staging file name
const NAME_PREFIX_LEN: usize = 64;

/// Local copy of one downloaded file, owned by a single run
///
/// The file is deleted when the value is dropped, whichever way the run exits.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
}

impl StagedFile {
    /// Reserve a uniquely named staging file for `name` inside `dir`
    pub async fn create(dir: &Path, name: &str) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let file = tempfile::Builder::new()
            .prefix(&format!("{}.", name_prefix(name)))
            .suffix(".staged")
            .tempfile_in(dir)?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub async fn write(&self, body: &[u8]) -> io::Result<()> {
        tokio::fs::write(self.path(), body).await
    }

    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }
}

/// Leading part of `name` that fits in a staging file name
fn name_prefix(name: &str) -> &str {
    if name.len() <= NAME_PREFIX_LEN {
        return name;
    }
    let mut end = NAME_PREFIX_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
