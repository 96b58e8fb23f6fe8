use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, IoContext, Result};

pub const RUN_RECORD_FILE: &str = "run.json";

/// What was launched, written to `bootstrap-log/run.json` so a later
/// process can find the instance again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub port: u16,
    pub url: String,
    pub root: String,
    pub started_at_unix_ms: u64,
    pub bootstrap_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher_pid: Option<u32>,
    pub exec: String,
    pub args: Vec<String>,
}

pub(crate) fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub async fn write_run_record(dir: &Path, record: &RunRecord) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .io_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(RUN_RECORD_FILE);
    let tmp = dir.join(format!("{RUN_RECORD_FILE}.tmp"));
    let data = serde_json::to_vec_pretty(record).map_err(|source| Error::Serialize {
        what: RUN_RECORD_FILE,
        source,
    })?;
    let mut f = tokio::fs::File::create(&tmp)
        .await
        .io_context(|| format!("create {}", tmp.display()))?;
    f.write_all(&data)
        .await
        .io_context(|| format!("write {}", tmp.display()))?;
    f.flush().await.ok();
    tokio::fs::rename(&tmp, &path)
        .await
        .io_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// `Ok(None)` when nothing was ever launched from this tree.
pub async fn read_run_record(dir: &Path) -> Result<Option<RunRecord>> {
    let path = dir.join(RUN_RECORD_FILE);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).io_context(|| format!("read {}", path.display())),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| Error::Serialize {
            what: RUN_RECORD_FILE,
            source,
        })
}
