//! Tabular build log.
//!
//! One row per processed filesystem node, plus a totals row for the whole
//! image.  The log is purely informational: it is written alongside the
//! image and never affects its bytes.  `-l -` selects stdout, `-l <file>`
//! a file; without `-l` every call here is a no-op.

use std::fs::File;
use std::io::Write;

use crate::error::BuildError;
use crate::fwfs::{NodeId, ObjectKind, Tree};

/// Paths longer than this go on their own line, with the row data following
/// under an empty path cell.
const PATH_COLUMN_WIDTH: usize = 40;

pub struct BuildLog {
    out: Option<Box<dyn Write>>,
}

impl BuildLog {
    pub fn disabled() -> Self {
        Self { out: None }
    }

    /// `-l` argument: `-` for stdout, anything else a file path.
    pub fn from_arg(arg: Option<&str>) -> Result<Self, BuildError> {
        let out: Box<dyn Write> = match arg {
            None => return Ok(Self::disabled()),
            Some("-") => Box::new(std::io::stdout()),
            Some(path) => Box::new(File::create(path).map_err(|e| BuildError::Io {
                context: format!("creating log file {path}"),
                source: e,
            })?),
        };
        Ok(Self { out: Some(out) })
    }

    fn write(&mut self, line: &str) {
        // Best effort: a full disk must not fail the build.
        if let Some(out) = &mut self.out {
            let _ = writeln!(out, "{line}");
        }
    }

    pub fn header(&mut self) {
        self.write(&format_columns([
            "Filename", "NameLen", "Children", "In", "Out", "Change", "", "ACL (R,W)", "Attr",
            "Compress",
        ]));
        self.write(&format_columns([
            "--------", "-------", "--------", "--", "---", "------", "", "---------", "----",
            "--------",
        ]));
    }

    /// Row for one processed node (file or directory).
    pub fn node_row(&mut self, tree: &Tree, node: NodeId) {
        if self.out.is_none() {
            return;
        }

        let mut path = tree.path(node);
        if path.len() > PATH_COLUMN_WIDTH {
            self.write(&path);
            path = String::new();
        }

        let input = tree.original_data_size(node);
        let output = tree.data_size(node);
        let acl = format!(
            "{}, {}",
            tree.ace_role(node, ObjectKind::ReadAce),
            tree.ace_role(node, ObjectKind::WriteAce)
        );
        self.write(&format_columns([
            &path,
            &tree.named(node).name.len().to_string(),
            &tree.child_count(node).to_string(),
            &input.to_string(),
            &output.to_string(),
            &(output as i64 - input as i64).to_string(),
            &ratio(input, output).to_string(),
            &acl,
            &tree.attrs(node).render(),
            tree.compression(node).as_str(),
        ]));
    }

    /// Separator plus a summary row over the whole image.
    pub fn totals(&mut self, tree: &Tree, root: NodeId) {
        if self.out.is_none() {
            return;
        }

        let input = tree.total_original_data_size(root);
        let output = tree.total_data_size(root);
        let files = format!("{} files", tree.file_count(root, true));
        self.write(&format_columns([
            "--------", "", "", "--", "---", "------", "", "", "", "",
        ]));
        self.write(&format_columns([
            &files,
            "",
            "",
            &input.to_string(),
            &output.to_string(),
            &(output as i64 - input as i64).to_string(),
            &ratio(input, output).to_string(),
            "",
            "",
            "",
        ]));
    }
}

/// Output size as a percentage of input size, rounded; 0 for empty input.
fn ratio(input: u64, output: u64) -> u64 {
    if input == 0 {
        0
    } else {
        (100.0 * output as f64 / input as f64).round() as u64
    }
}

fn format_columns(cols: [&str; 10]) -> String {
    format!(
        "{:<40} {:>8} {:>8} {:>8} {:>8} {:>8} {:>5}%  {:<16} {:<8} {:<8}",
        cols[0], cols[1], cols[2], cols[3], cols[4], cols[5], cols[6], cols[7], cols[8], cols[9]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_rounds_and_handles_empty() {
        assert_eq!(ratio(0, 0), 0);
        assert_eq!(ratio(100, 100), 100);
        assert_eq!(ratio(200, 50), 25);
        assert_eq!(ratio(3, 1), 33);
        assert_eq!(ratio(3, 2), 67);
    }

    #[test]
    fn columns_are_fixed_width() {
        let line = format_columns(["a.txt", "5", "2", "10", "10", "0", "100", "guest, admin", "--", "none"]);
        assert!(line.starts_with("a.txt "));
        // Path column is 40 wide, then a space, then the name length
        // right-aligned in 8.
        assert_eq!(&line[40..49], "        5");
        assert!(line.contains("  100%  "));
        assert!(line.contains("guest, admin"));
    }

    #[test]
    fn disabled_log_ignores_rows() {
        let mut log = BuildLog::disabled();
        log.header();
        // No output sink; just must not panic.
        let mut tree = Tree::new();
        let volume = tree.new_volume("v").unwrap();
        let root = tree.add_directory(volume, "", 0).unwrap();
        log.node_row(&tree, root);
        log.totals(&tree, root);
    }

    #[test]
    fn log_file_receives_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");

        let mut tree = Tree::new();
        let volume = tree.new_volume("v").unwrap();
        let root = tree.add_directory(volume, "", 0).unwrap();
        let file = tree.add_file(root, "hello.txt", 0).unwrap();
        tree.append_data(file, b"hi".to_vec()).unwrap();

        {
            let mut log = BuildLog::from_arg(Some(path.to_str().unwrap())).unwrap();
            log.header();
            log.node_row(&tree, file);
            log.totals(&tree, root);
        }

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Filename"));
        assert!(text.contains("/hello.txt"));
        assert!(text.contains("1 files"));
    }

    #[test]
    fn long_paths_get_their_own_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");

        let mut tree = Tree::new();
        let volume = tree.new_volume("v").unwrap();
        let root = tree.add_directory(volume, "", 0).unwrap();
        let long_name = "a".repeat(60);
        let file = tree.add_file(root, &long_name, 0).unwrap();

        {
            let mut log = BuildLog::from_arg(Some(path.to_str().unwrap())).unwrap();
            log.node_row(&tree, file);
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("/{long_name}"));
        assert!(lines[1].starts_with(' '));
    }
}
