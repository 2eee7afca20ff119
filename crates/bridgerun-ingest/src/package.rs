//! Legacy package extraction
//!
//! Flattens package inputs into a single directory of `.dtsx` files:
//!
//! - **Outer archives** (`.zip`): scanned at any depth for `.ispac` packages
//!   and nested `.zip` archives, all opened in memory
//! - **Packages** (`.ispac`): zip containers whose `.dtsx` entries are extracted
//! - **Loose units** (`.dtsx`): copied as-is
//!
//! Extracted files are named `<package>_<entry>`. When that name is taken the
//! first free `<package>_<n>_<entry>` (n >= 1) is used instead, so an existing
//! file is never overwritten, even across repeated runs.

use crate::discovery::{file_name, has_extension};
use bridgerun_common::checksum::compute_checksum;
use bridgerun_common::{BridgeError, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{Cursor, ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const OUTER_ARCHIVE_EXT: &str = "zip";
pub const PACKAGE_ARCHIVE_EXT: &str = "ispac";
pub const PACKAGE_UNIT_EXT: &str = "dtsx";

/// Upper bound on collision suffixes tried for one name
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// One unit written to the destination directory
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedUnit {
    /// Package the unit came from (file stem of the `.ispac` or outer archive)
    pub package: String,
    /// Entry name inside the package
    pub entry: String,
    /// Where the unit was written
    pub path: PathBuf,
    pub checksum: String,
}

impl ExtractedUnit {
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    /// Name the unit gets when nothing collides (`<package>_<entry>`)
    pub fn base_name(&self) -> String {
        let package = Some(self.package.as_str()).filter(|p| !p.is_empty());
        candidate_name(package, &self.entry, 0)
    }
}

/// An input that could not be extracted
#[derive(Debug, Clone, Serialize)]
pub struct FailedInput {
    /// Input name (file name or archive entry path)
    pub input: String,
    pub reason: String,
}

/// Outcome of an extraction pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub extracted: Vec<ExtractedUnit>,
    /// `.ispac` packages that are not valid archives
    pub invalid: Vec<FailedInput>,
    /// Outer archives or entries that could not be read
    pub failed: Vec<FailedInput>,
}

impl ExtractionReport {
    /// Inputs that produced no units, invalid packages first
    pub fn problems(&self) -> impl Iterator<Item = &FailedInput> {
        self.invalid.iter().chain(self.failed.iter())
    }

    fn fail(&mut self, input: impl Into<String>, reason: impl Into<String>) {
        let input = input.into();
        let reason = reason.into();
        warn!(input = %input, "Failed to read package input: {}", reason);
        self.failed.push(FailedInput { input, reason });
    }

    fn reject(&mut self, input: impl Into<String>, reason: impl Into<String>) {
        let input = input.into();
        let reason = reason.into();
        warn!(input = %input, "Skipping invalid package: {}", reason);
        self.invalid.push(FailedInput { input, reason });
    }
}

/// Extracts package inputs into a flat destination directory
#[derive(Debug, Clone)]
pub struct PackageExtractor {
    destination: PathBuf,
}

impl PackageExtractor {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Extract every package input found in `source` (a directory or one file)
    ///
    /// Per-input problems are collected in the report; only destination or
    /// source I/O errors abort the pass.
    pub fn extract_all(&self, source: &Path) -> Result<ExtractionReport> {
        if !source.exists() {
            return Err(BridgeError::configuration(format!(
                "source path not found: {}",
                source.display()
            )));
        }
        std::fs::create_dir_all(&self.destination)?;

        let inputs = if source.is_file() {
            vec![source.to_path_buf()]
        } else {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(source)? {
                let path = entry?.path();
                if path.is_file() {
                    paths.push(path);
                }
            }
            paths.sort();
            paths
        };

        let mut report = ExtractionReport::default();
        for input in inputs {
            self.extract_input(&input, &mut report)?;
        }

        info!(
            destination = %self.destination.display(),
            extracted = report.extracted.len(),
            invalid = report.invalid.len(),
            failed = report.failed.len(),
            "Package extraction complete"
        );
        Ok(report)
    }

    fn extract_input(&self, path: &Path, report: &mut ExtractionReport) -> Result<()> {
        let name = file_name(path);
        let stem = file_stem(&name);

        if has_extension(path, OUTER_ARCHIVE_EXT) {
            let bytes = std::fs::read(path)?;
            self.extract_outer_archive(&name, &stem, &bytes, report)
        } else if has_extension(path, PACKAGE_ARCHIVE_EXT) {
            let bytes = std::fs::read(path)?;
            self.extract_package(&name, &stem, &bytes, report)
        } else if has_extension(path, PACKAGE_UNIT_EXT) {
            let bytes = std::fs::read(path)?;
            let unit = self.write_unit(None, &name, &bytes)?;
            report.extracted.push(unit);
            Ok(())
        } else {
            debug!(input = %name, "Ignoring non-package file");
            Ok(())
        }
    }

    /// Walk an outer archive held in memory
    ///
    /// Loose `.dtsx` entries are attributed to the archive itself.
    fn extract_outer_archive(
        &self,
        label: &str,
        stem: &str,
        bytes: &[u8],
        report: &mut ExtractionReport,
    ) -> Result<()> {
        let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
            Ok(archive) => archive,
            Err(e) => {
                report.fail(label, format!("not a valid zip archive: {}", e));
                return Ok(());
            },
        };

        for (entry_name, contents) in read_entries(&mut archive, label, report) {
            let entry_label = format!("{}/{}", label, entry_name);
            let entry_file = entry_name.rsplit('/').next().unwrap_or(&entry_name).to_string();
            let entry_stem = file_stem(&entry_file);
            let entry_path = Path::new(&entry_file);

            if has_extension(entry_path, PACKAGE_ARCHIVE_EXT) {
                self.extract_package(&entry_label, &entry_stem, &contents, report)?;
            } else if has_extension(entry_path, OUTER_ARCHIVE_EXT) {
                self.extract_outer_archive(&entry_label, &entry_stem, &contents, report)?;
            } else if has_extension(entry_path, PACKAGE_UNIT_EXT) {
                let unit = self.write_unit(Some(stem), &entry_file, &contents)?;
                report.extracted.push(unit);
            }
        }
        Ok(())
    }

    /// Extract the `.dtsx` entries of one `.ispac` held in memory
    fn extract_package(
        &self,
        label: &str,
        stem: &str,
        bytes: &[u8],
        report: &mut ExtractionReport,
    ) -> Result<()> {
        let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
            Ok(archive) => archive,
            Err(e) => {
                report.reject(label, format!("invalid package: {}", e));
                return Ok(());
            },
        };

        let mut found = 0usize;
        for (entry_name, contents) in read_entries(&mut archive, label, report) {
            let entry_file = entry_name.rsplit('/').next().unwrap_or(&entry_name).to_string();
            if !has_extension(Path::new(&entry_file), PACKAGE_UNIT_EXT) {
                continue;
            }
            let unit = self.write_unit(Some(stem), &entry_file, &contents)?;
            report.extracted.push(unit);
            found += 1;
        }

        if found == 0 {
            debug!(package = %label, "Package contains no .{} entries", PACKAGE_UNIT_EXT);
        }
        Ok(())
    }

    fn write_unit(&self, package: Option<&str>, entry: &str, contents: &[u8]) -> Result<ExtractedUnit> {
        let path = write_new(&self.destination, package, entry, contents)?;
        let checksum = compute_checksum(&mut Cursor::new(contents))?;
        debug!(path = %path.display(), "Extracted {}", entry);
        Ok(ExtractedUnit {
            package: package.unwrap_or_default().to_string(),
            entry: entry.to_string(),
            path,
            checksum,
        })
    }
}

/// Read every file entry of an archive, recording unreadable entries as failures
fn read_entries<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    label: &str,
    report: &mut ExtractionReport,
) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = match archive.by_index(i) {
            Ok(file) => file,
            Err(e) => {
                report.fail(format!("{}#{}", label, i), format!("unreadable entry: {}", e));
                continue;
            },
        };
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut contents = Vec::new();
        if let Err(e) = file.read_to_end(&mut contents) {
            report.fail(format!("{}/{}", label, name), format!("unreadable entry: {}", e));
            continue;
        }
        entries.push((name, contents));
    }
    entries
}

/// Candidate file name for attempt `n` (0 is the plain name)
pub fn candidate_name(package: Option<&str>, entry: &str, n: usize) -> String {
    match (package, n) {
        (Some(pkg), 0) => format!("{}_{}", pkg, entry),
        (Some(pkg), n) => format!("{}_{}_{}", pkg, n, entry),
        (None, 0) => entry.to_string(),
        (None, n) => format!("{}_{}", n, entry),
    }
}

/// Write `contents` under the first free candidate name in `dir`
///
/// `create_new` makes the existence check and the create one step.
fn write_new(dir: &Path, package: Option<&str>, entry: &str, contents: &[u8]) -> Result<PathBuf> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(candidate_name(package, entry, n));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(contents)?;
                file.sync_all()?;
                return Ok(path);
            },
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(BridgeError::archive(format!(
        "no free file name for {} in {}",
        entry,
        dir.display()
    )))
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn sorted_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name(Some("Sales"), "Load.dtsx", 0), "Sales_Load.dtsx");
        assert_eq!(candidate_name(Some("Sales"), "Load.dtsx", 2), "Sales_2_Load.dtsx");
        assert_eq!(candidate_name(None, "Load.dtsx", 0), "Load.dtsx");
        assert_eq!(candidate_name(None, "Load.dtsx", 1), "1_Load.dtsx");
    }

    #[test]
    fn test_extracts_nested_packages() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        let ispac = zip_bytes(&[
            ("Package1.dtsx", b"<p1/>"),
            ("@Project.manifest", b"<m/>"),
            ("sub/Package2.dtsx", b"<p2/>"),
        ]);
        let outer = zip_bytes(&[("deploy/Sales.ispac", &ispac)]);
        fs::write(source.path().join("release.zip"), outer).unwrap();

        let report = PackageExtractor::new(dest.path()).extract_all(source.path()).unwrap();

        assert!(report.problems().next().is_none());
        assert_eq!(report.extracted.len(), 2);
        assert_eq!(
            sorted_names(dest.path()),
            vec!["Sales_Package1.dtsx", "Sales_Package2.dtsx"]
        );
        assert_eq!(report.extracted[0].package, "Sales");
        assert_eq!(fs::read(dest.path().join("Sales_Package1.dtsx")).unwrap(), b"<p1/>");
    }

    #[test]
    fn test_invalid_package_is_skipped() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        let good = zip_bytes(&[("A.dtsx", b"<a/>")]);
        let outer = zip_bytes(&[("Broken.ispac", b"not a zip"), ("Good.ispac", &good)]);
        fs::write(source.path().join("bundle.zip"), outer).unwrap();

        let report = PackageExtractor::new(dest.path()).extract_all(source.path()).unwrap();

        assert_eq!(report.extracted.len(), 1);
        assert!(report.failed.is_empty());
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].input, "bundle.zip/Broken.ispac");
        assert_eq!(sorted_names(dest.path()), vec!["Good_A.dtsx"]);
    }

    #[test]
    fn test_repeat_extraction_never_overwrites() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        let ispac = zip_bytes(&[("Load.dtsx", b"<v1/>")]);
        fs::write(source.path().join("Sales.ispac"), ispac).unwrap();

        let extractor = PackageExtractor::new(dest.path());
        extractor.extract_all(source.path()).unwrap();
        let second = extractor.extract_all(source.path()).unwrap();

        assert_eq!(second.extracted[0].file_name(), "Sales_1_Load.dtsx");
        assert_eq!(second.extracted[0].base_name(), "Sales_Load.dtsx");
        assert_eq!(
            sorted_names(dest.path()),
            vec!["Sales_1_Load.dtsx", "Sales_Load.dtsx"]
        );
    }

    #[test]
    fn test_loose_units_are_copied() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("Daily.dtsx"), b"<d/>").unwrap();
        fs::write(source.path().join("readme.txt"), b"ignore me").unwrap();

        let report = PackageExtractor::new(dest.path()).extract_all(source.path()).unwrap();

        assert_eq!(report.extracted.len(), 1);
        assert_eq!(sorted_names(dest.path()), vec!["Daily.dtsx"]);
    }

    #[test]
    fn test_corrupt_outer_archive_reported() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("bad.zip"), b"garbage").unwrap();

        let report = PackageExtractor::new(dest.path()).extract_all(source.path()).unwrap();

        assert!(report.extracted.is_empty());
        assert_eq!(report.failed[0].input, "bad.zip");
    }
}
