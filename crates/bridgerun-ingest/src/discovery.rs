//! Work item discovery
//!
//! Scans a source root for convertible units (files with a given extension),
//! either directly under the root or grouped per immediate subfolder.

use bridgerun_common::types::{ItemId, WorkItem};
use bridgerun_common::{BridgeError, Result};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How the source root is partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Per-folder when any immediate subfolder holds units, flat otherwise
    #[default]
    Auto,
    /// Only units directly under the root
    Flat,
    /// One batch per immediate subfolder
    Folders,
}

impl std::str::FromStr for Layout {
    type Err = BridgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Layout::Auto),
            "flat" => Ok(Layout::Flat),
            "folders" | "per-folder" => Ok(Layout::Folders),
            _ => Err(BridgeError::Parse(format!(
                "Invalid layout '{}'. Use auto, flat or folders",
                s
            ))),
        }
    }
}

/// The mode discovery resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Flat,
    PerFolder,
}

/// Units that are processed together (one analyzer call per batch)
#[derive(Debug, Clone)]
pub struct Batch {
    /// Subfolder name, `None` for units directly under the root
    pub name: Option<String>,
    pub dir: PathBuf,
    pub items: Vec<WorkItem>,
}

/// A subfolder excluded by the date filter
#[derive(Debug, Clone)]
pub struct SkippedFolder {
    pub name: String,
    pub dir: PathBuf,
    /// Units the folder would have contributed (names only, never read)
    pub item_ids: Vec<ItemId>,
}

/// Result of a discovery scan
#[derive(Debug, Clone)]
pub struct DiscoveryPlan {
    pub mode: DiscoveryMode,
    pub batches: Vec<Batch>,
    pub skipped: Vec<SkippedFolder>,
    pub warnings: Vec<String>,
}

impl DiscoveryPlan {
    /// Number of items that will be processed
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(|b| b.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.batches.iter().flat_map(|b| b.items.iter())
    }
}

/// Scanner for convertible units under a source root
#[derive(Debug, Clone)]
pub struct Discovery {
    root: PathBuf,
    extension: String,
    layout: Layout,
    skip_modified_on: Option<NaiveDate>,
}

impl Discovery {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_lowercase(),
            layout: Layout::Auto,
            skip_modified_on: None,
        }
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Exclude subfolders whose modification date equals `date`
    pub fn skip_modified_on(mut self, date: NaiveDate) -> Self {
        self.skip_modified_on = Some(date);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the root and group the units found
    pub fn scan(&self) -> Result<DiscoveryPlan> {
        if !self.root.exists() {
            return Err(BridgeError::configuration(format!(
                "source path not found: {}",
                self.root.display()
            )));
        }

        let mut plan = DiscoveryPlan {
            mode: DiscoveryMode::Flat,
            batches: Vec::new(),
            skipped: Vec::new(),
            warnings: Vec::new(),
        };

        // A single file is a flat run of one unit
        if self.root.is_file() {
            if has_extension(&self.root, &self.extension) {
                let id = ItemId::new(file_name(&self.root));
                plan.batches.push(Batch {
                    name: None,
                    dir: self.root.parent().map(Path::to_path_buf).unwrap_or_default(),
                    items: vec![WorkItem::new(id, self.root.clone(), None)],
                });
            } else {
                plan.warnings.push(format!(
                    "{} is not a .{} file",
                    self.root.display(),
                    self.extension
                ));
            }
            return Ok(plan);
        }

        // Date-filtered folders are set aside before layout detection
        let mut subfolders = Vec::new();
        for dir in self.subfolders()? {
            match self.skip_modified_on {
                Some(date) if self.layout != Layout::Flat && was_modified_on(&dir, date)? => {
                    self.skip_folder(dir, date, &mut plan)?;
                },
                _ => subfolders.push(dir),
            }
        }

        let per_folder = match self.layout {
            Layout::Flat => false,
            Layout::Folders => true,
            Layout::Auto => {
                let mut any = false;
                for dir in &subfolders {
                    if iter_units(dir, &self.extension)?.next().is_some() {
                        any = true;
                        break;
                    }
                }
                any
            },
        };

        let root_items = self.collect_items(&self.root, None)?;
        if !root_items.is_empty() {
            plan.batches.push(Batch {
                name: None,
                dir: self.root.clone(),
                items: root_items,
            });
        }

        if per_folder {
            plan.mode = DiscoveryMode::PerFolder;
            for dir in subfolders {
                self.scan_subfolder(dir, &mut plan)?;
            }
        }

        if plan.is_empty() && plan.skipped.is_empty() {
            let message = format!(
                "No .{} files found in {}",
                self.extension,
                self.root.display()
            );
            warn!("{}", message);
            plan.warnings.push(message);
        }

        info!(
            root = %self.root.display(),
            items = plan.item_count(),
            batches = plan.batches.len(),
            skipped_folders = plan.skipped.len(),
            "Discovery complete"
        );

        Ok(plan)
    }

    /// Record a date-filtered folder; only its entry names are listed
    fn skip_folder(&self, dir: PathBuf, date: NaiveDate, plan: &mut DiscoveryPlan) -> Result<()> {
        let name = file_name(&dir);
        info!(folder = %name, "Skipping folder modified on {}", date);
        let mut item_ids: Vec<ItemId> = iter_units(&dir, &self.extension)?
            .map(|path| ItemId::from_relative(&self.root, &path))
            .collect();
        item_ids.sort();
        plan.skipped.push(SkippedFolder { name, dir, item_ids });
        Ok(())
    }

    fn scan_subfolder(&self, dir: PathBuf, plan: &mut DiscoveryPlan) -> Result<()> {
        let name = file_name(&dir);
        let items = self.collect_items(&dir, Some(name.clone()))?;
        if items.is_empty() {
            let message = format!("Skipping {}: no .{} files found", dir.display(), self.extension);
            debug!("{}", message);
            plan.warnings.push(message);
            return Ok(());
        }

        plan.batches.push(Batch {
            name: Some(name),
            dir,
            items,
        });
        Ok(())
    }

    fn collect_items(&self, dir: &Path, folder: Option<String>) -> Result<Vec<WorkItem>> {
        let mut paths: Vec<PathBuf> = iter_units(dir, &self.extension)?.collect();
        paths.sort();
        Ok(paths
            .into_iter()
            .map(|path| {
                let id = ItemId::from_relative(&self.root, &path);
                WorkItem::new(id, path, folder.clone())
            })
            .collect())
    }

    fn subfolders(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// Lazily iterate the units directly inside `dir`
pub fn iter_units<'a>(
    dir: &Path,
    extension: &'a str,
) -> Result<impl Iterator<Item = PathBuf> + 'a> {
    let entries = std::fs::read_dir(dir)?;
    Ok(entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(move |path| path.is_file() && has_extension(path, extension)))
}

/// List the extracted package units in `dir`, sorted by file name
pub fn discover_packages(dir: &Path) -> Result<Vec<WorkItem>> {
    let mut paths: Vec<PathBuf> = iter_units(dir, crate::package::PACKAGE_UNIT_EXT)?.collect();
    paths.sort();
    Ok(paths
        .into_iter()
        .map(|path| WorkItem::new(ItemId::new(file_name(&path)), path, None))
        .collect())
}

/// Whether `path`'s modification date (local time) equals `date`
pub fn was_modified_on(path: &Path, date: NaiveDate) -> Result<bool> {
    let modified = std::fs::metadata(path)?.modified()?;
    let modified: DateTime<Local> = modified.into();
    Ok(modified.date_naive() == date)
}

pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
