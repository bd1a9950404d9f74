use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use super::model::NewFile;
use super::Store;

/// Password the admin row is seeded with when no override is configured.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub default_password: String,
    /// Insert the sample catalog when the files table is empty.
    pub seed_samples: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            default_password: DEFAULT_ADMIN_PASSWORD.into(),
            seed_samples: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub admin_seeded: bool,
    pub files_seeded: usize,
}

fn sample_files() -> Vec<NewFile> {
    vec![
        NewFile {
            name: "Sample PDF document".into(),
            description: "A sample PDF for trying out downloads".into(),
            url: "https://example.com/sample.pdf".into(),
            category: "documents".into(),
            size: 1_024_000,
            file_type: "pdf".into(),
        },
        NewFile {
            name: "Sample wallpaper".into(),
            description: "High resolution wallpaper image".into(),
            url: "https://example.com/image.jpg".into(),
            category: "images".into(),
            size: 512_000,
            file_type: "jpg".into(),
        },
        NewFile {
            name: "Sample installer".into(),
            description: "Windows system utility".into(),
            url: "https://example.com/software.exe".into(),
            category: "software".into(),
            size: 15_360_000,
            file_type: "exe".into(),
        },
    ]
}

impl Store {
    /// Create tables, seed the admin row and optionally the sample catalog.
    ///
    /// Safe to call repeatedly: the admin row is only written when absent and
    /// samples are only inserted into an empty files table. A failed sample
    /// insert is logged and skipped.
    pub fn initialize(&self, opts: &InitOptions) -> Result<InitReport> {
        self.ensure_schema().context("create tables")?;

        let mut report = InitReport::default();

        if self.admin_config()?.is_none() {
            self.set_admin_password(&opts.default_password)
                .context("seed admin config")?;
            report.admin_seeded = true;
            info!("seeded default admin password");
        }

        if opts.seed_samples && self.count_files()? == 0 {
            for file in sample_files() {
                let name = file.name.clone();
                match self.insert_file(file) {
                    Ok(_) => report.files_seeded += 1,
                    Err(e) => warn!(error = %e, name = %name, "failed to seed sample file"),
                }
            }
            info!(count = report.files_seeded, "seeded sample files");
        }

        Ok(report)
    }
}
