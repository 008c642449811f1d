// pgvault/src/backup/commands.rs
use std::path::Path;

use super::{BackupOptions, BackupType};
use crate::utils::command::{CommandSpec, Pipeline};

/// Environment variable through which key material reaches `openssl`.
pub const ENCRYPTION_KEY_ENV: &str = "BACKUP_ENCRYPTION_KEY";

const CIPHER: &str = "-aes-256-cbc";

/// Type-specific pg_dump flags.
pub fn dump_flags(backup_type: BackupType) -> &'static [&'static str] {
    match backup_type {
        BackupType::Schema => &["--schema-only"],
        BackupType::Data => &["--data-only"],
        BackupType::Incremental => &["--verbose"],
        BackupType::Full => &["--verbose", "--no-owner", "--no-privileges"],
    }
}

/// `pg_dump <url> <flags> [| gzip] > output`
pub fn dump_pipeline(
    database_url: &str,
    backup_type: BackupType,
    options: &BackupOptions,
    compress: bool,
    output: &Path,
) -> Pipeline {
    let mut dump = CommandSpec::new("pg_dump")
        .arg(database_url)
        .args(dump_flags(backup_type).iter().copied());
    for table in &options.exclude_tables {
        dump = dump.arg(format!("--exclude-table={table}"));
    }
    for table in &options.include_tables {
        dump = dump.arg(format!("--table={table}"));
    }

    let pipeline = Pipeline::new(dump);
    let pipeline = if compress {
        pipeline.pipe(CommandSpec::new("gzip"))
    } else {
        pipeline
    };
    pipeline.stdout_to(output)
}

fn cipher_command(decrypt: bool, input: &Path, output: &Path, key: &str) -> Pipeline {
    let mut openssl = CommandSpec::new("openssl").arg("enc");
    if decrypt {
        openssl = openssl.arg("-d");
    }
    let openssl = openssl
        .args([CIPHER, "-salt", "-pbkdf2"])
        .arg("-in")
        .arg(input.as_os_str())
        .arg("-out")
        .arg(output.as_os_str())
        .arg("-pass")
        .arg(format!("env:{ENCRYPTION_KEY_ENV}"))
        .env(ENCRYPTION_KEY_ENV, key);
    Pipeline::new(openssl)
}

pub fn encrypt_command(input: &Path, output: &Path, key: &str) -> Pipeline {
    cipher_command(false, input, output, key)
}

pub fn decrypt_command(input: &Path, output: &Path, key: &str) -> Pipeline {
    cipher_command(true, input, output, key)
}
