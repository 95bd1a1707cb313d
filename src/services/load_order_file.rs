use crate::models::{LoadOrder, Plugin, PluginStatus, QuarantineDisposition};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::fs;
use std::sync::LazyLock;
use thiserror::Error;

/// Section header that precedes removal markers in the final file
pub const REMOVED_SECTION: &str = "##REMOVED PLUGINS##";

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#(?P<plugin>[^#]+?)\s+#REMOVED BY (?P<tool>[^(]+?) \((?P<ts>[^)]*)\)\s*$")
        .expect("Invalid removal marker regex")
});

#[derive(Error, Debug)]
pub enum LoadOrderFileError {
    #[error("Failed to read load order file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write load order file {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// A commented-out entry left behind by a previous quarantine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalMarker {
    pub plugin: String,
    pub tool: String,
    pub timestamp: String,
}

impl RemovalMarker {
    pub fn new(plugin: impl Into<String>, tool: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            tool: tool.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let caps = MARKER_RE.captures(line.trim())?;
        Some(Self::new(
            caps["plugin"].trim(),
            caps["tool"].trim(),
            &caps["ts"],
        ))
    }

    pub fn render(&self) -> String {
        format!("#{} #REMOVED BY {} ({})", self.plugin, self.tool, self.timestamp)
    }
}

/// The external plain-text load-order file.
///
/// One plugin per line; `#` lines are inactive. Some managers prefix enabled
/// entries with `*`, which is stripped on read and restored on write.
#[derive(Debug, Clone)]
pub struct LoadOrderFile {
    path: Utf8PathBuf,
    header: Vec<String>,
    entries: Vec<String>,
    inactive: Vec<String>,
    markers: Vec<RemovalMarker>,
    star_prefix: bool,
}

impl LoadOrderFile {
    /// Read and parse the file at `path`.
    pub fn read<P: AsRef<Utf8Path>>(path: P) -> Result<Self, LoadOrderFileError> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).map_err(|source| LoadOrderFileError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Self::parse(path, &content))
    }

    /// Parse file content without touching the filesystem.
    pub fn parse(path: Utf8PathBuf, content: &str) -> Self {
        let mut header = Vec::new();
        let mut entries = Vec::new();
        let mut inactive = Vec::new();
        let mut markers = Vec::new();
        let mut star_prefix = false;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed == REMOVED_SECTION {
                continue;
            }
            if let Some(marker) = RemovalMarker::parse(trimmed) {
                markers.push(marker);
            } else if trimmed.starts_with('#') {
                if entries.is_empty() && inactive.is_empty() && trimmed.starts_with("##") {
                    header.push(trimmed.to_string());
                } else {
                    inactive.push(trimmed.to_string());
                }
            } else if let Some(rest) = trimmed.strip_prefix('*') {
                star_prefix = true;
                let name = rest.trim();
                if !name.is_empty() {
                    entries.push(name.to_string());
                }
            } else {
                entries.push(trimmed.to_string());
            }
        }

        Self {
            path,
            header,
            entries,
            inactive,
            markers,
            star_prefix,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Active entries in file order
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn markers(&self) -> &[RemovalMarker] {
        &self.markers
    }

    pub fn uses_star_prefix(&self) -> bool {
        self.star_prefix
    }

    /// Content of the file for one launch: header, then the active set.
    pub fn render_active(&self, active_set: &[String]) -> String {
        let mut lines: Vec<String> = self.header.clone();
        lines.extend(active_set.iter().map(|p| self.entry_line(p)));
        finish(lines)
    }

    /// Materialize `active_set` as the load order for the next launch.
    pub fn write_active(&self, active_set: &[String]) -> Result<(), LoadOrderFileError> {
        self.write(&self.render_active(active_set))
    }

    /// Content of the file at session end.
    ///
    /// Kept plugins follow the load order (required, optional, then the rest
    /// in original relative order). Relocated plugins disappear; commented
    /// and still-failed plugins get a marker under [`REMOVED_SECTION`].
    /// Markers already present in `existing` are carried over once, except
    /// for plugins that are active again.
    ///
    /// # Arguments
    /// * `load_order` - Final session state
    /// * `tool` - Name written into new markers
    /// * `timestamp` - Marker timestamp, fixed per session
    /// * `existing` - Markers found in the file so far
    pub fn render_final(
        &self,
        load_order: &LoadOrder,
        tool: &str,
        timestamp: &str,
        existing: &[RemovalMarker],
    ) -> String {
        let mut lines: Vec<String> = self.header.clone();
        let mut kept = Vec::new();
        let mut removed: IndexMap<String, RemovalMarker> = IndexMap::new();

        for marker in self.markers.iter().chain(existing) {
            removed
                .entry(Plugin::key(&marker.plugin))
                .or_insert_with(|| marker.clone());
        }

        for plugin in load_order.iter() {
            match (plugin.status, plugin.disposition) {
                (PluginStatus::Quarantined, Some(QuarantineDisposition::Relocated)) => {
                    removed.shift_remove(&Plugin::key(&plugin.name));
                }
                (PluginStatus::Quarantined, _) | (PluginStatus::Failed, _) => {
                    removed
                        .entry(Plugin::key(&plugin.name))
                        .or_insert_with(|| RemovalMarker::new(&plugin.name, tool, timestamp));
                }
                _ => {
                    removed.shift_remove(&Plugin::key(&plugin.name));
                    kept.push(self.entry_line(&plugin.name));
                }
            }
        }

        lines.extend(kept);
        lines.extend(self.inactive.iter().cloned());

        if !removed.is_empty() {
            lines.push(String::new());
            lines.push(REMOVED_SECTION.to_string());
            lines.extend(removed.values().map(RemovalMarker::render));
        }
        finish(lines)
    }

    /// Rewrite the file with its final content and return what was written.
    ///
    /// Markers already on disk are merged in, so repeated calls with the
    /// same state produce identical content.
    pub fn write_final(
        &self,
        load_order: &LoadOrder,
        tool: &str,
        timestamp: &str,
    ) -> Result<String, LoadOrderFileError> {
        let on_disk = match fs::read_to_string(&self.path) {
            Ok(content) => Self::parse(self.path.clone(), &content).markers,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(LoadOrderFileError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let content = self.render_final(load_order, tool, timestamp, &on_disk);
        self.write(&content)?;
        Ok(content)
    }

    fn entry_line(&self, plugin: &str) -> String {
        if self.star_prefix {
            format!("*{}", plugin)
        } else {
            plugin.to_string()
        }
    }

    fn write(&self, content: &str) -> Result<(), LoadOrderFileError> {
        fs::write(&self.path, content).map_err(|source| LoadOrderFileError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn finish(lines: Vec<String>) -> String {
    let mut content = lines.join("\n");
    content.push('\n');
    content
}
