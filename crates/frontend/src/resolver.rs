//! Filesystem module resolver
//!
//! Implements the runtime's `ModuleResolver` contract: resolves an import
//! path against the importing module's directory and the configured search
//! paths, parses the file, and hands the AST back. The runtime's module
//! cache provides execution ordering and circular-import detection; this
//! layer guards the filesystem side.
//!
//! Path policy: `@stdlib/...` paths resolve only inside the configured
//! stdlib root; every resolved path must stay under its search root, so
//! `..` traversal out of the tree is refused.

use crate::parser::parse_program;
use rill_core::Program;
use rill_runtime::runtime::ModuleResolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SOURCE_EXTENSION: &str = "rill";

pub struct FsResolver {
    /// Tried in order, before the importer's own directory.
    search_paths: Vec<PathBuf>,
    /// Root for `@stdlib/` imports, when configured.
    stdlib_root: Option<PathBuf>,
}

impl FsResolver {
    pub fn new(search_paths: Vec<PathBuf>) -> FsResolver {
        FsResolver {
            search_paths,
            stdlib_root: None,
        }
    }

    pub fn with_stdlib(mut self, root: PathBuf) -> FsResolver {
        self.stdlib_root = Some(root);
        self
    }

    /// Append the source extension unless the path already carries one.
    fn with_extension(path: &Path) -> PathBuf {
        if path.extension().is_some() {
            path.to_path_buf()
        } else {
            path.with_extension(SOURCE_EXTENSION)
        }
    }

    /// Canonicalize `candidate` and verify it stays under `root`.
    fn resolve_under(root: &Path, relative: &Path) -> Option<PathBuf> {
        let candidate = Self::with_extension(&root.join(relative));
        let resolved = candidate.canonicalize().ok()?;
        let root = root.canonicalize().ok()?;
        if resolved.starts_with(&root) {
            Some(resolved)
        } else {
            // Escaped the search root via `..` or a symlink.
            None
        }
    }

    fn locate(&self, path: &str, importer_dir: &Path) -> Result<PathBuf, String> {
        if let Some(rest) = path.strip_prefix("@stdlib/") {
            let root = self
                .stdlib_root
                .as_ref()
                .ok_or_else(|| format!("'{path}': no stdlib root is configured"))?;
            return Self::resolve_under(root, Path::new(rest))
                .ok_or_else(|| format!("'{path}' not found in the stdlib root"));
        }
        if Path::new(path).is_absolute() {
            return Err(format!("'{path}': absolute import paths are not allowed"));
        }
        for root in self.search_paths.iter().chain(std::iter::once(&importer_dir.to_path_buf())) {
            if let Some(found) = Self::resolve_under(root, Path::new(path)) {
                return Ok(found);
            }
        }
        Err(format!("module '{path}' not found"))
    }
}

impl ModuleResolver for FsResolver {
    fn load(&self, path: &str, importer_dir: &Path) -> Result<(PathBuf, Arc<Program>), String> {
        let resolved = self.locate(path, importer_dir)?;
        let source = std::fs::read_to_string(&resolved)
            .map_err(|e| format!("cannot read '{}': {e}", resolved.display()))?;
        let program = parse_program(&source)
            .map_err(|e| format!("parse error in '{}': {e}", resolved.display()))?;
        Ok((resolved, Arc::new(program)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_resolves_relative_to_importer() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "util.rill", "export let x = 1;");
        let resolver = FsResolver::new(vec![]);
        let (key, program) = resolver.load("util", dir.path()).unwrap();
        assert!(key.ends_with("util.rill"));
        assert_eq!(program.stmts.len(), 1);
    }

    #[test]
    fn test_search_paths_take_precedence() {
        let libs = tempfile::tempdir().unwrap();
        let here = tempfile::tempdir().unwrap();
        write(libs.path(), "shared.rill", "export let from_libs = 1;");
        write(here.path(), "shared.rill", "export let from_here = 1;");
        let resolver = FsResolver::new(vec![libs.path().to_path_buf()]);
        let (key, _) = resolver.load("shared", here.path()).unwrap();
        assert!(key.starts_with(libs.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        write(dir.path(), "secret.rill", "export let s = 1;");
        let resolver = FsResolver::new(vec![]);
        // `../secret` escapes the importer directory root.
        assert!(resolver.load("../secret", &inner).is_err());
    }

    #[test]
    fn test_stdlib_prefix() {
        let stdlib = tempfile::tempdir().unwrap();
        write(stdlib.path(), "strings.rill", "export let version = 1;");
        let resolver =
            FsResolver::new(vec![]).with_stdlib(stdlib.path().to_path_buf());
        assert!(resolver.load("@stdlib/strings", Path::new(".")).is_ok());
        assert!(resolver.load("@stdlib/../strings", Path::new(".")).is_err());
        let bare = FsResolver::new(vec![]);
        assert!(bare.load("@stdlib/strings", Path::new(".")).is_err());
    }

    #[test]
    fn test_parse_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.rill", "let = ;");
        let resolver = FsResolver::new(vec![]);
        let err = resolver.load("bad", dir.path()).unwrap_err();
        assert!(err.contains("parse error"));
    }
}
