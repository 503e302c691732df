use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FavsyncPaths {
    pub favsync_home: PathBuf,
    pub output_dir: PathBuf,
    pub records_dir: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<FavsyncPaths> {
    let favsync_home = match env::var("FAVSYNC_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("favsync"),
    };

    let output_dir = env_or_default_path(
        "FAVSYNC_OUTPUT_DIR",
        favsync_home.join("output").join("markdown"),
    );
    let records_dir = env_or_default_path(
        "FAVSYNC_RECORDS_DIR",
        favsync_home.join("output").join("sync_records"),
    );
    let logs_dir = env_or_default_path("FAVSYNC_LOGS_DIR", favsync_home.join("logs"));

    Ok(FavsyncPaths {
        favsync_home,
        output_dir,
        records_dir,
        logs_dir,
    })
}
