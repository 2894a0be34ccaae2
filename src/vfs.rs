use std::collections::BTreeMap;

use itertools::Itertools;

use crate::domain::FileContent;

#[derive(Debug, Clone, thiserror::Error)]
pub enum VfsError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

#[derive(Clone, Debug)]
enum Entry {
    File(FileContent),
    Dir,
}

/// In-memory path -> content store used to stage a run's files before a
/// back-end touches them and to collect produced artifacts afterwards.
///
/// Each instance is exclusively owned by the run that created it and is
/// discarded after finalization; nothing here is shared across runs.
#[derive(Debug, Default)]
pub struct VirtualFs {
    entries: BTreeMap<String, Entry>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a file, auto-creating missing ancestor directories.
    pub fn write(&mut self, path: &str, content: impl Into<FileContent>) -> Result<(), VfsError> {
        let path = normalize(path)?;
        self.create_ancestors(&path)?;
        self.entries.insert(path, Entry::File(content.into()));
        Ok(())
    }

    pub fn read(&self, path: &str) -> Result<&FileContent, VfsError> {
        let path = normalize(path)?;
        match self.entries.get(&path) {
            Some(Entry::File(content)) => Ok(content),
            Some(Entry::Dir) => Err(VfsError::NotAFile(path)),
            None => Err(VfsError::NotFound(path)),
        }
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), VfsError> {
        let path = normalize(path)?;
        self.create_ancestors(&path)?;
        match self.entries.get(&path) {
            Some(Entry::File(_)) => Err(VfsError::NotAFile(path)),
            _ => {
                self.entries.insert(path, Entry::Dir);
                Ok(())
            }
        }
    }

    /// Immediate child names of a directory, de-duplicated and sorted.
    pub fn list(&self, path: &str) -> Vec<String> {
        let prefix = match path.trim_matches('/') {
            "" => String::new(),
            p => format!("{p}/"),
        };
        self.entries
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unique()
            .collect()
    }

    /// Removes an entry and, for directories, everything beneath it.
    pub fn remove(&mut self, path: &str) -> Result<(), VfsError> {
        let path = normalize(path)?;
        if self.entries.remove(&path).is_none() {
            return Err(VfsError::NotFound(path));
        }
        let child_prefix = format!("{path}/");
        self.entries.retain(|key, _| !key.starts_with(&child_prefix));
        Ok(())
    }

    /// Bulk-stages a flat path -> content map under `base_dir`. This is how
    /// a run's file set lands in the filesystem before a back-end is invoked.
    pub fn mount(
        &mut self,
        files: &BTreeMap<String, FileContent>,
        base_dir: &str,
    ) -> Result<(), VfsError> {
        let base = base_dir.trim_matches('/');
        for (path, content) in files {
            let full = if base.is_empty() {
                path.clone()
            } else {
                format!("{base}/{path}")
            };
            self.write(&full, content.clone())?;
        }
        Ok(())
    }

    /// Collects the named output paths into a name -> bytes map, silently
    /// omitting anything missing or unreadable.
    pub fn snapshot(&self, paths: &[String]) -> BTreeMap<String, Vec<u8>> {
        let mut artifacts = BTreeMap::new();
        for path in paths {
            if let Ok(content) = self.read(path) {
                artifacts.insert(path.clone(), content.as_bytes().to_vec());
            }
        }
        artifacts
    }

    fn create_ancestors(&mut self, path: &str) -> Result<(), VfsError> {
        let segments: Vec<&str> = path.split('/').collect();
        let mut ancestor = String::new();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(segment);
            match self.entries.get(&ancestor) {
                Some(Entry::File(_)) => return Err(VfsError::NotAFile(ancestor)),
                Some(Entry::Dir) => {}
                None => {
                    self.entries.insert(ancestor.clone(), Entry::Dir);
                }
            }
        }
        Ok(())
    }
}

fn normalize(path: &str) -> Result<String, VfsError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(VfsError::InvalidPath(path.to_string()));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(VfsError::InvalidPath(path.to_string()));
        }
    }
    Ok(trimmed.to_string())
}
