use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use nix::fcntl::{Flock, FlockArg};

use crate::store::{
    CoordinationStore, InstanceMeta, InstanceStore, Job, JobStatus, JobStore, StoreResult,
};

const COORDINATION_DIR: &str = "coordination";
const JOBS_DIR: &str = "jobs";
const INSTANCES_DIR: &str = "instances";
const LOCK_FILE: &str = ".lock";
const RECORD_SUFFIX: &str = "json";

pub fn default_data_dir() -> PathBuf {
    let mut home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    home.push(".evald");
    home
}

/// Store backend over a shared directory.
///
/// All accesses are serialized through an exclusive `flock` on a single lock
/// file, which is what makes `compare_and_swap` atomic between processes
/// sharing the directory. Record writes go through a temporary file and a
/// rename, so a crash cannot leave a torn record behind; a temporary file
/// orphaned by a crash is ignored by the directory scans.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: &Path) -> StoreResult<Self> {
        for dir in [COORDINATION_DIR, JOBS_DIR, INSTANCES_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Cannot create store directory {path:?}"))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Lists all instance metadata records, sorted by instance id.
    pub fn all_instances(&self) -> StoreResult<Vec<(String, InstanceMeta)>> {
        let _lock = self.lock()?;
        let mut result = Vec::new();
        for entry in std::fs::read_dir(self.root.join(INSTANCES_DIR))? {
            let path = entry?.path();
            if !is_record(&path) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)?;
            let meta: InstanceMeta = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed instance record {path:?}"))?;
            result.push((id.to_string(), meta));
        }
        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }

    fn lock(&self) -> StoreResult<Flock<File>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| anyhow::anyhow!("Cannot lock store: {errno}"))
    }

    fn coordination_path(&self, key: &str) -> PathBuf {
        self.root.join(COORDINATION_DIR).join(key)
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.root.join(JOBS_DIR).join(format!("{id}.{RECORD_SUFFIX}"))
    }

    fn instance_path(&self, id: &str) -> PathBuf {
        self.root
            .join(INSTANCES_DIR)
            .join(format!("{id}.{RECORD_SUFFIX}"))
    }
}

/// Record files end in `.json`; anything else in a scanned directory is a
/// temporary file left behind by a writer that died before its rename.
fn is_record(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(RECORD_SUFFIX)
}

fn read_value(path: &Path) -> StoreResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Cannot read {path:?}")),
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Record path {path:?} has no parent"))?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.persist(path)
        .map_err(|e| anyhow::anyhow!("Cannot persist record {path:?}: {e}"))?;
    Ok(())
}

impl CoordinationStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _lock = self.lock()?;
        read_value(&self.coordination_path(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let _lock = self.lock()?;
        write_atomic(&self.coordination_path(key), value.as_bytes())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> StoreResult<bool> {
        let _lock = self.lock()?;
        let path = self.coordination_path(key);
        if read_value(&path)?.as_deref() != expected {
            return Ok(false);
        }
        write_atomic(&path, new.as_bytes())?;
        Ok(true)
    }
}

impl JobStore for FileStore {
    fn admit(&self, job: &Job) -> StoreResult<bool> {
        let _lock = self.lock()?;
        let path = self.job_path(&job.id);
        if path.exists() {
            return Ok(false);
        }
        write_atomic(&path, &serde_json::to_vec_pretty(job)?)?;
        Ok(true)
    }

    fn get(&self, id: &str) -> StoreResult<Option<Job>> {
        let _lock = self.lock()?;
        match read_value(&self.job_path(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, job: &Job) -> StoreResult<()> {
        let _lock = self.lock()?;
        write_atomic(&self.job_path(&job.id), &serde_json::to_vec_pretty(job)?)
    }

    fn jobs_with_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let _lock = self.lock()?;
        let mut jobs = Vec::new();
        for entry in std::fs::read_dir(self.root.join(JOBS_DIR))? {
            let path = entry?.path();
            if !is_record(&path) {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let job: Job = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed job record {path:?}"))?;
            if job.status == status {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }
}

impl InstanceStore for FileStore {
    fn get(&self, id: &str) -> StoreResult<Option<InstanceMeta>> {
        let _lock = self.lock()?;
        match read_value(&self.instance_path(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, id: &str, meta: &InstanceMeta) -> StoreResult<()> {
        let _lock = self.lock()?;
        write_atomic(&self.instance_path(id), &serde_json::to_vec_pretty(meta)?)
    }
}
