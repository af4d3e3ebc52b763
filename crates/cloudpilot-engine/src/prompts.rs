//! Named prompt templates loaded from a directory of markdown files.

use std::fs;
use std::path::PathBuf;

use crate::error::EngineError;

/// Loads prompts by name from `<dir>/<name>.md`.
///
/// Code-generation prompts are special: the base prompt at
/// `codegen/base.md` is concatenated with an optional per-service file at
/// `codegen/<service>.md`, and a missing base degrades to a built-in
/// fallback so code generation always has instructions.
pub struct PromptLibrary {
    dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PromptLibrary { dir: dir.into() }
    }

    /// Loads a named prompt. Missing files are an error for named prompts.
    pub fn load(&self, name: &str) -> Result<String, EngineError> {
        let path = self.dir.join(format!("{name}.md"));
        fs::read_to_string(&path).map_err(|_| EngineError::PromptMissing(name.to_string()))
    }

    /// The codegen prompt pair: base text plus an optional service section.
    pub fn codegen_prompts(&self, service: &str) -> (String, Option<String>) {
        let base = self
            .load("codegen/base")
            .unwrap_or_else(|_| cloudpilot_codegen::FALLBACK_BASE_PROMPT.to_string());
        let service_section = if service.is_empty() || service == "unknown" {
            None
        } else {
            self.load(&format!("codegen/{service}")).ok()
        };
        (base, service_section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> (tempfile::TempDir, PromptLibrary) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("codegen")).expect("mkdir");
        fs::write(dir.path().join("normalizer.md"), "normalize this").expect("write");
        fs::write(dir.path().join("codegen/base.md"), "base instructions").expect("write");
        fs::write(dir.path().join("codegen/compute.md"), "compute patterns").expect("write");
        let library = PromptLibrary::new(dir.path());
        (dir, library)
    }

    #[test]
    fn named_prompts_load_and_missing_ones_error() {
        let (_dir, library) = library();
        assert_eq!(library.load("normalizer").expect("prompt"), "normalize this");
        assert!(matches!(
            library.load("planner"),
            Err(EngineError::PromptMissing(name)) if name == "planner"
        ));
    }

    #[test]
    fn codegen_pair_degrades_to_base_only() {
        let (_dir, library) = library();

        let (base, service) = library.codegen_prompts("compute");
        assert_eq!(base, "base instructions");
        assert_eq!(service.as_deref(), Some("compute patterns"));

        let (_, missing) = library.codegen_prompts("objectstorage");
        assert!(missing.is_none());
    }

    #[test]
    fn missing_base_falls_back_to_the_builtin() {
        let library = PromptLibrary::new("/nonexistent/prompts");
        let (base, service) = library.codegen_prompts("compute");
        assert_eq!(base, cloudpilot_codegen::FALLBACK_BASE_PROMPT);
        assert!(service.is_none());
    }
}
