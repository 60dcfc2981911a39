//! Single-writer, multi-reader JSON document on disk.
//!
//! Readers take a shared advisory lock on the document. Writers serialize on
//! an exclusive lock on a sibling `<file>.lock`, write a temp file in the same
//! directory while holding an exclusive lock on it, fsync, and rename it over
//! the document. A reader therefore sees either the old or the new document,
//! never a mix, and two writers never interleave.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::Result;

pub struct LockedJsonFile<T> {
    path: PathBuf,
    lock_path: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

/// Held for the duration of a write; unlocks on drop.
struct WriteGuard {
    file: File,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl<T> LockedJsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Current document, or `None` if it has never been written.
    pub fn read(&self) -> Result<Option<T>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        FileExt::lock_shared(&file)?;
        let mut data = String::new();
        let read = file.read_to_string(&mut data);
        let _ = FileExt::unlock(&file);
        read?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    pub fn write(&self, value: &T) -> Result<()> {
        let _guard = self.lock_writer()?;
        self.replace(value)
    }

    /// Read-modify-write under the writer lock. A missing document starts
    /// from `T::default()`.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R>
    where
        T: Default,
    {
        let _guard = self.lock_writer()?;
        let mut doc = self.read()?.unwrap_or_default();
        let out = f(&mut doc)?;
        self.replace(&doc)?;
        Ok(out)
    }

    fn lock_writer(&self) -> Result<WriteGuard> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        if FileExt::try_lock_exclusive(&file).is_err() {
            tracing::debug!(lock = %self.lock_path.display(), "waiting for state file lock");
            FileExt::lock_exclusive(&file)?;
        }
        Ok(WriteGuard { file })
    }

    fn replace(&self, value: &T) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        FileExt::lock_exclusive(tmp.as_file())?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), value)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        let file = tmp.persist(&self.path).map_err(|e| e.error)?;
        let _ = FileExt::unlock(&file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let f: LockedJsonFile<BTreeMap<String, u32>> = LockedJsonFile::new(dir.path().join("s.json"));
        assert!(f.read().unwrap().is_none());
        assert_eq!(f.lock_path(), dir.path().join("s.json.lock"));
    }

    #[test]
    fn update_starts_from_default() {
        let dir = TempDir::new().unwrap();
        let f: LockedJsonFile<BTreeMap<String, u32>> = LockedJsonFile::new(dir.path().join("s.json"));
        f.update(|m| {
            m.insert("a".into(), 1);
            Ok(())
        })
        .unwrap();
        let n = f
            .update(|m| {
                *m.entry("a".into()).or_default() += 1;
                Ok(m["a"])
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(f.read().unwrap().unwrap()["a"], 2);
    }

    #[test]
    fn concurrent_readers_never_see_partial_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.json");
        let f: LockedJsonFile<Vec<String>> = LockedJsonFile::new(&path);
        let doc = |generation: usize| -> Vec<String> {
            (0..10_000).map(|i| format!("entry-{generation}-{i}")).collect()
        };
        f.write(&doc(0)).unwrap();

        let done = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| {
                for generation in 1..=5 {
                    f.write(&doc(generation)).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });
            let readers: Vec<_> = (0..100)
                .map(|_| {
                    s.spawn(|| {
                        let reader: LockedJsonFile<Vec<String>> = LockedJsonFile::new(&path);
                        let entries = reader.read().unwrap().expect("document exists");
                        assert_eq!(entries.len(), 10_000);
                        let generation = entries[0].split('-').nth(1).unwrap().to_string();
                        assert!(entries
                            .iter()
                            .all(|e| e.split('-').nth(1) == Some(generation.as_str())));
                    })
                })
                .collect();
            for r in readers {
                r.join().unwrap();
            }
        });
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(f.read().unwrap().unwrap()[0], "entry-5-0");
    }

    #[cfg(unix)]
    #[test]
    fn readers_in_other_processes_never_see_partial_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.json");
        let out = dir.path().join("reads");
        std::fs::create_dir_all(&out).unwrap();
        let f: LockedJsonFile<Vec<String>> = LockedJsonFile::new(&path);
        let doc = |generation: usize| -> Vec<String> {
            (0..10_000).map(|i| format!("entry-{generation}-{i}")).collect()
        };
        f.write(&doc(0)).unwrap();

        let script = r#"i=0; while [ $i -lt 40 ]; do cat "$1" > "$2/r$3-$i.json"; i=$((i+1)); done"#;
        let readers: Vec<_> = (0..4)
            .map(|n| {
                std::process::Command::new("sh")
                    .arg("-c")
                    .arg(script)
                    .arg("sh")
                    .arg(&path)
                    .arg(&out)
                    .arg(n.to_string())
                    .spawn()
                    .unwrap()
            })
            .collect();
        for generation in 1..=20 {
            f.write(&doc(generation)).unwrap();
        }
        for mut r in readers {
            assert!(r.wait().unwrap().success());
        }

        let mut seen = 0;
        for entry in std::fs::read_dir(&out).unwrap() {
            let bytes = std::fs::read(entry.unwrap().path()).unwrap();
            let entries: Vec<String> = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(entries.len(), 10_000);
            let generation = entries[0].split('-').nth(1).unwrap().to_string();
            assert!(entries
                .iter()
                .all(|e| e.split('-').nth(1) == Some(generation.as_str())));
            seen += 1;
        }
        assert_eq!(seen, 160);
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let f: LockedJsonFile<BTreeMap<String, u32>> = LockedJsonFile::new(&path);
                    for _ in 0..10 {
                        f.update(|m| {
                            *m.entry("n".into()).or_default() += 1;
                            Ok(())
                        })
                        .unwrap();
                    }
                });
            }
        });
        let f: LockedJsonFile<BTreeMap<String, u32>> = LockedJsonFile::new(&path);
        assert_eq!(f.read().unwrap().unwrap()["n"], 80);
    }
}
