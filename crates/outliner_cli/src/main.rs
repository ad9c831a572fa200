//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `outliner_core` linkage with deterministic output.
//! - Optionally open an outline database and print its tree.
//!
//! Usage: `outliner_cli [DB_PATH]`
//!
//! With a database path, logs are written to `logs/` next to the database.

use outliner_core::db::open_db;
use outliner_core::{
    default_log_level, init_logging, BulletContent, Document, Pbid, SqliteBackingStore,
    ROOT_BULLET_PBID,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("outliner_core ping={}", outliner_core::ping());
    println!("outliner_core version={}", outliner_core::core_version());

    let Some(db_path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };
    match print_outline(&db_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_outline(db_path: &str) -> Result<(), Box<dyn Error>> {
    let log_dir = log_dir_for(Path::new(db_path))?;
    if let Err(err) = init_logging(default_log_level(), &log_dir.to_string_lossy()) {
        eprintln!("warning: logging disabled: {err}");
    }

    let conn = open_db(db_path)?;
    let store = SqliteBackingStore::try_new(&conn)?;
    let mut document = Document::new(&store)?;
    print_subtree(&mut document, ROOT_BULLET_PBID, 0)
}

/// `logs/` beside the database file, as an absolute path.
fn log_dir_for(db_path: &Path) -> std::io::Result<PathBuf> {
    let db_path = if db_path.is_absolute() {
        db_path.to_path_buf()
    } else {
        std::env::current_dir()?.join(db_path)
    };
    let parent = db_path.parent().unwrap_or_else(|| Path::new("/"));
    Ok(parent.join("logs"))
}

fn print_subtree(
    document: &mut Document<&SqliteBackingStore<'_>>,
    pbid: Pbid,
    depth: usize,
) -> Result<(), Box<dyn Error>> {
    let bullet = document.fetch_bullet_by_pbid(pbid)?;
    let label = match &bullet.content {
        BulletContent::Textual { text } => text.replace(['\n', '\r'], " "),
        BulletContent::Mirror { referee } => format!("(mirror of {referee})"),
    };
    let children = bullet.children.clone();

    if !bullet.is_root() {
        println!("{}- [{pbid}] {label}", "  ".repeat(depth - 1));
    }
    let child_depth = if bullet.is_root() { 1 } else { depth + 1 };
    for child in children {
        print_subtree(document, child, child_depth)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::log_dir_for;
    use std::path::Path;

    #[test]
    fn log_dir_sits_next_to_database() {
        let dir = log_dir_for(Path::new("/tmp/outlines/work.db")).unwrap();
        assert_eq!(dir, Path::new("/tmp/outlines/logs"));
    }

    #[test]
    fn relative_database_path_yields_absolute_log_dir() {
        let dir = log_dir_for(Path::new("work.db")).unwrap();
        assert!(dir.is_absolute());
        assert!(dir.ends_with("logs"));
    }
}
