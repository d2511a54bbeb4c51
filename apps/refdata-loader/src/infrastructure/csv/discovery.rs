//! Input file discovery.
//!
//! Scans one directory (not recursively) and classifies files by name.
//! Files matching neither pattern are ignored.

use std::path::Path;

use crate::application::ports::FileAccessError;
use crate::application::services::LoadPlan;

/// Which pipeline a file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Name contains `daily_prices`.
    DailyPrices,
    /// Name contains `dividends`.
    Dividends,
}

/// Classify a file by its name.
#[must_use]
pub fn classify(path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_str()?;
    if name.contains("daily_prices") {
        Some(FileKind::DailyPrices)
    } else if name.contains("dividends") {
        Some(FileKind::Dividends)
    } else {
        None
    }
}

/// List the price and dividend files in `dir`, each sorted by name.
///
/// # Errors
///
/// Returns [`FileAccessError`] if the directory cannot be listed.
pub fn discover_files(dir: &Path) -> Result<LoadPlan, FileAccessError> {
    let entries = std::fs::read_dir(dir).map_err(|e| FileAccessError::new(dir, e.to_string()))?;

    let mut plan = LoadPlan::default();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Could not read directory entry");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }

        match classify(&path) {
            Some(FileKind::DailyPrices) => plan.price_files.push(path),
            Some(FileKind::Dividends) => plan.dividend_files.push(path),
            None => tracing::debug!(path = %path.display(), "Ignoring unrecognised file"),
        }
    }

    plan.price_files.sort();
    plan.dividend_files.sort();

    tracing::info!(
        dir = %dir.display(),
        price_files = plan.price_files.len(),
        dividend_files = plan.dividend_files.len(),
        "Discovered input files"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use test_case::test_case;

    use super::*;

    fn file_names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect()
    }

    #[test_case("NYSE_daily_prices_A.csv", Some(FileKind::DailyPrices) ; "prices")]
    #[test_case("NYSE_dividends_A.csv", Some(FileKind::Dividends) ; "dividends")]
    #[test_case("README.md", None ; "other")]
    fn classifies_by_name(name: &str, expected: Option<FileKind>) {
        assert_eq!(classify(Path::new(name)), expected);
    }

    #[test]
    fn discovers_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "NYSE_daily_prices_B.csv",
            "NYSE_daily_prices_A.csv",
            "NYSE_dividends_A.csv",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), "header\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("old_daily_prices")).unwrap();

        let plan = discover_files(dir.path()).unwrap();

        assert_eq!(
            file_names(&plan.price_files),
            vec!["NYSE_daily_prices_A.csv", "NYSE_daily_prices_B.csv"]
        );
        assert_eq!(file_names(&plan.dividend_files), vec!["NYSE_dividends_A.csv"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(discover_files(Path::new("/nonexistent/refdata")).is_err());
    }
}
