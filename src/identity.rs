//! Identity: daily sequential index generation and the passport lineage
//! chain stamped from Project down to Artifact.
//!
//! Identifiers follow `<ClassName>-<data_type>-<YYYYMMDD>-<env>-<seq>`,
//! where `seq` is monotone within a UTC calendar day and resets at
//! 00:00 UTC.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::Env;
use crate::context::{Category, DataType, StageType};
use crate::errors::IdentityError;

/// File-backed daily counter with atomic read-modify-write.
///
/// State is a single record `YYYYMMDD <seq>`; the write goes through a
/// temporary file and rename so a crash can never leave a torn record.
#[derive(Debug)]
pub struct IdxGen {
    path: PathBuf,
    guard: Mutex<()>,
}

impl IdxGen {
    pub fn new(ops_dir: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let dir = ops_dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| IdentityError::Store {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            path: dir.join("idxgen"),
            guard: Mutex::new(()),
        })
    }

    /// Current UTC date key.
    pub fn today() -> String {
        Utc::now().format("%Y%m%d").to_string()
    }

    /// Returns the next index for today, persisting the increment.
    pub fn next_idx(&self) -> Result<u64, IdentityError> {
        let _guard = self.guard.lock().unwrap();
        let today = Self::today();

        let next = match self.read_record()? {
            Some((date, seq)) if date == today => seq + 1,
            Some(_) => {
                info!(date = %today, "Date changed, index reset");
                1
            }
            None => 1,
        };

        self.write_record(&today, next)?;
        Ok(next)
    }

    fn read_record(&self) -> Result<Option<(String, u64)>, IdentityError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(IdentityError::Store {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        let mut parts = raw.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(date), Some(seq)) => {
                let seq = seq
                    .parse()
                    .map_err(|_| IdentityError::Corrupt(raw.clone()))?;
                Ok(Some((date.to_string(), seq)))
            }
            _ => Err(IdentityError::Corrupt(raw)),
        }
    }

    fn write_record(&self, date: &str, seq: u64) -> Result<(), IdentityError> {
        let tmp = self.path.with_extension("tmp");
        let store_err = |source: std::io::Error| IdentityError::Store {
            path: self.path.display().to_string(),
            source,
        };
        fs::write(&tmp, format!("{date} {seq}\n")).map_err(store_err)?;
        fs::rename(&tmp, &self.path).map_err(store_err)?;
        Ok(())
    }
}

/// Common identity record carried by every passport in the chain.
#[derive(Debug, Clone)]
pub struct Passport {
    pub id: u64,
    pub name: String,
    pub category: Category,
    pub data_type: DataType,
    pub env: Env,
    pub created: DateTime<Utc>,
}

impl Passport {
    fn issue(
        idxgen: &IdxGen,
        class_name: &str,
        category: Category,
        data_type: DataType,
        env: Env,
    ) -> Result<Self, IdentityError> {
        let id = idxgen.next_idx()?;
        let name = format!(
            "{class_name}-{}-{}-{}-{id}",
            data_type.label(),
            IdxGen::today(),
            env.label()
        );
        Ok(Self {
            id,
            name,
            category,
            data_type,
            env,
            created: Utc::now(),
        })
    }
}

/// Root of the lineage chain.
#[derive(Debug, Clone)]
pub struct ProjectPassport {
    pub passport: Passport,
}

impl ProjectPassport {
    pub fn new(
        idxgen: &IdxGen,
        category: Category,
        data_type: DataType,
        env: Env,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            passport: Passport::issue(idxgen, "Project", category, data_type, env)?,
        })
    }

    pub fn project_id(&self) -> u64 {
        self.passport.id
    }
}

#[derive(Debug, Clone)]
pub struct JobPassport {
    pub passport: Passport,
    pub project_id: u64,
}

impl JobPassport {
    pub fn new(idxgen: &IdxGen, creator: &ProjectPassport) -> Result<Self, IdentityError> {
        let p = &creator.passport;
        Ok(Self {
            passport: Passport::issue(idxgen, "Job", p.category, p.data_type, p.env)?,
            project_id: p.id,
        })
    }

    pub fn job_id(&self) -> u64 {
        self.passport.id
    }
}

#[derive(Debug, Clone)]
pub struct TaskPassport {
    pub passport: Passport,
    pub project_id: u64,
    pub job_id: u64,
}

impl TaskPassport {
    pub fn new(idxgen: &IdxGen, creator: &JobPassport) -> Result<Self, IdentityError> {
        let p = &creator.passport;
        Ok(Self {
            passport: Passport::issue(idxgen, "Task", p.category, p.data_type, p.env)?,
            project_id: creator.project_id,
            job_id: p.id,
        })
    }

    pub fn task_id(&self) -> u64 {
        self.passport.id
    }
}

#[derive(Debug, Clone)]
pub struct OperationPassport {
    pub passport: Passport,
    pub project_id: u64,
    pub job_id: u64,
    pub task_id: u64,
    pub operation_type: StageType,
}

impl OperationPassport {
    pub fn new(
        idxgen: &IdxGen,
        creator: &TaskPassport,
        operation_type: StageType,
    ) -> Result<Self, IdentityError> {
        let p = &creator.passport;
        Ok(Self {
            passport: Passport::issue(idxgen, "Operation", p.category, p.data_type, p.env)?,
            project_id: creator.project_id,
            job_id: creator.job_id,
            task_id: p.id,
            operation_type,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactPassport {
    pub passport: Passport,
    pub project_id: u64,
    pub job_id: u64,
    pub task_id: u64,
    pub operation_id: u64,
    pub operation_type: StageType,
}

impl ArtifactPassport {
    pub fn new(idxgen: &IdxGen, creator: &OperationPassport) -> Result<Self, IdentityError> {
        let p = &creator.passport;
        Ok(Self {
            passport: Passport::issue(idxgen, "Artifact", p.category, p.data_type, p.env)?,
            project_id: creator.project_id,
            job_id: creator.job_id,
            task_id: creator.task_id,
            operation_id: p.id,
            operation_type: creator.operation_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gen() -> (tempfile::TempDir, IdxGen) {
        let dir = tempfile::tempdir().unwrap();
        let gen = IdxGen::new(dir.path()).unwrap();
        (dir, gen)
    }

    #[test]
    fn test_index_is_monotone() {
        let (_dir, gen) = test_gen();
        let a = gen.next_idx().unwrap();
        let b = gen.next_idx().unwrap();
        let c = gen.next_idx().unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let gen = IdxGen::new(dir.path()).unwrap();
            assert_eq!(gen.next_idx().unwrap(), 1);
        }
        let gen = IdxGen::new(dir.path()).unwrap();
        assert_eq!(gen.next_idx().unwrap(), 2);
    }

    #[test]
    fn test_stale_date_resets() {
        let (_dir, gen) = test_gen();
        gen.write_record("19990101", 41).unwrap();
        assert_eq!(gen.next_idx().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let (_dir, gen) = test_gen();
        std::fs::write(&gen.path, "garbage").unwrap();
        assert!(matches!(
            gen.next_idx(),
            Err(IdentityError::Corrupt(_))
        ));
    }

    #[test]
    fn test_passport_chain_lineage() {
        let (_dir, gen) = test_gen();
        let project =
            ProjectPassport::new(&gen, Category::BOOKS, DataType::AppData, Env::Test).unwrap();
        let job = JobPassport::new(&gen, &project).unwrap();
        let task = TaskPassport::new(&gen, &job).unwrap();
        let operation = OperationPassport::new(&gen, &task, StageType::Extract).unwrap();
        let artifact = ArtifactPassport::new(&gen, &operation).unwrap();

        assert_eq!(job.project_id, project.project_id());
        assert_eq!(task.job_id, job.job_id());
        assert_eq!(artifact.task_id, task.task_id());
        assert_eq!(artifact.operation_type, StageType::Extract);

        // Sequence is monotone across the chain, whatever the class.
        assert!(project.passport.id < job.passport.id);
        assert!(job.passport.id < task.passport.id);
        assert!(operation.passport.id < artifact.passport.id);
    }

    #[test]
    fn test_passport_name_format() {
        let (_dir, gen) = test_gen();
        let project =
            ProjectPassport::new(&gen, Category::BOOKS, DataType::AppData, Env::Test).unwrap();
        let name = &project.passport.name;
        assert!(name.starts_with("Project-appdata-"));
        assert!(name.ends_with("-test-1"));
        let parts: Vec<_> = name.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[2].len(), 8); // YYYYMMDD
    }
}
