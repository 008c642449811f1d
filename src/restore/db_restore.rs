// pgvault/src/restore/db_restore.rs
use std::path::Path;

use crate::utils::command::{CommandSpec, Pipeline};

fn psql(target_db_url: &str) -> CommandSpec {
    CommandSpec::new("psql")
        .arg("-X") // Do not read psqlrc
        .arg("-q")
        .arg("-v")
        .arg("ON_ERROR_STOP=1")
        .arg("-d")
        .arg(target_db_url)
}

/// Feeds a plaintext SQL dump into `psql`, decompressing on the way when
/// the file is gzip-compressed.
pub fn load_pipeline(target_db_url: &str, sql_file_path: &Path, compressed: bool) -> Pipeline {
    if compressed {
        Pipeline::new(CommandSpec::new("gzip").arg("-dc").arg(sql_file_path.as_os_str()))
            .pipe(psql(target_db_url))
    } else {
        Pipeline::new(psql(target_db_url).arg("-f").arg(sql_file_path.as_os_str()))
    }
}
