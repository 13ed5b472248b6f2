//! Clean command - remove generated sources and build outputs

use super::{load_project, HostArgs};
use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn run(dirs: &[PathBuf], host: &HostArgs) -> Result<()> {
    let session = host.session()?;

    for dir in dirs {
        let config = load_project(dir)?;
        let root = config.project_root().to_path_buf();
        let mut ctx = session.project(config, Vec::new());
        let result = ctx.clean();
        ctx.close();
        result.with_context(|| format!("Failed to clean {}", root.display()))?;
        println!("Cleaned {}", root.display());
    }

    session.finish();
    Ok(())
}
