//! Course and exercise types plus the `course.json` loader
//!
//! A course is an ordered list of exercises in a single target language.
//! The loader resolves the per-exercise file paths by convention
//! (`exercises/<id>/`) so that the rest of the crate only ever sees
//! fully-resolved [`Exercise`] values.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading or validating a course
#[derive(Debug, Error)]
pub enum CourseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid course manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("course name must not be empty")]
    EmptyName,

    #[error("course has no exercises")]
    NoExercises,

    #[error("duplicate exercise id: {0}")]
    DuplicateId(String),

    #[error("duplicate exercise ordinal: {0}")]
    DuplicateOrder(u32),

    #[error("exercise '{id}' is missing required field: {field}")]
    MissingField { id: String, field: &'static str },
}

/// Target language of a course
///
/// Closed enumeration: every language carries its fixed test-runner
/// profile, so adding a language is a compile-time exhaustive match
/// rather than a runtime table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Python,
    Go,
    Rust,
}

/// Fixed per-language test-runner profile
///
/// The single point of extension for supporting a new language.
#[derive(Debug, Clone, Copy)]
pub struct LanguageProfile {
    /// Test-runner executable
    pub program: &'static str,
    /// Arguments that precede the exercise-specific argument
    pub base_args: &'static [&'static str],
    /// Glob pattern matching test files of this language
    pub test_glob: &'static str,
    /// Extension of student-editable source files
    pub source_extension: &'static str,
}

impl Language {
    /// The fixed command profile for this language
    pub fn profile(&self) -> LanguageProfile {
        match self {
            Language::Javascript => LanguageProfile {
                program: "npx",
                base_args: &["jest"],
                test_glob: "*.test.js",
                source_extension: "js",
            },
            Language::Python => LanguageProfile {
                program: "python3",
                base_args: &["-m", "pytest"],
                test_glob: "test_*.py",
                source_extension: "py",
            },
            Language::Go => LanguageProfile {
                program: "go",
                base_args: &["test"],
                test_glob: "*_test.go",
                source_extension: "go",
            },
            Language::Rust => LanguageProfile {
                program: "cargo",
                base_args: &["test"],
                test_glob: "*_test.rs",
                source_extension: "rs",
            },
        }
    }

    /// Conventional source file name for an exercise id
    pub fn source_file(&self, id: &str) -> String {
        format!("{}.{}", id, self.profile().source_extension)
    }

    /// Conventional test file name for an exercise id
    pub fn test_file(&self, id: &str) -> String {
        match self {
            Language::Javascript => format!("{id}.test.js"),
            Language::Python => format!("test_{id}.py"),
            Language::Go => format!("{id}_test.go"),
            Language::Rust => format!("{id}_test.rs"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::Javascript),
            "python" | "py" => Ok(Language::Python),
            "go" => Ok(Language::Go),
            "rust" | "rs" => Ok(Language::Rust),
            other => Err(format!(
                "unknown language: '{other}'. Supported: javascript, python, go, rust"
            )),
        }
    }
}

/// One unit of coursework
///
/// Immutable once loaded; the core never mutates or destroys exercises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exercise {
    /// Unique, stable identifier
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Short description shown to the student
    pub description: String,
    /// Ordinal position; defines sequence and gating order
    pub order: u32,
    /// Student-editable source file
    pub source_path: PathBuf,
    /// Test file run by the executor
    pub test_path: PathBuf,
    /// Instructional text
    pub readme_path: PathBuf,
}

/// Entry in the `course.json` manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestExercise {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    order: u32,
}

/// The `course.json` manifest shape
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    name: String,
    language: Language,
    exercises: Vec<ManifestExercise>,
}

/// A loaded course: ordered exercises plus the workspace root
#[derive(Debug, Clone)]
pub struct Course {
    pub name: String,
    pub language: Language,
    /// Directory containing `course.json`; working directory for test runs
    pub root: PathBuf,
    /// Sorted by ordinal, ascending
    pub exercises: Vec<Exercise>,
}

impl Course {
    /// Load and validate a course from a directory containing `course.json`
    pub fn load(dir: &Path) -> Result<Self, CourseError> {
        let manifest_path = dir.join("course.json");
        debug!(path = %manifest_path.display(), "loading course manifest");

        let content = fs::read_to_string(&manifest_path).map_err(|source| CourseError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        let manifest: Manifest = serde_json::from_str(&content)?;

        if manifest.name.trim().is_empty() {
            return Err(CourseError::EmptyName);
        }
        if manifest.exercises.is_empty() {
            return Err(CourseError::NoExercises);
        }

        let mut seen_ids = HashSet::new();
        let mut seen_orders = HashSet::new();
        let mut exercises = Vec::with_capacity(manifest.exercises.len());

        for entry in &manifest.exercises {
            if entry.id.trim().is_empty() {
                return Err(CourseError::MissingField {
                    id: entry.id.clone(),
                    field: "id",
                });
            }
            if entry.title.trim().is_empty() {
                return Err(CourseError::MissingField {
                    id: entry.id.clone(),
                    field: "title",
                });
            }
            if !seen_ids.insert(entry.id.clone()) {
                return Err(CourseError::DuplicateId(entry.id.clone()));
            }
            if !seen_orders.insert(entry.order) {
                return Err(CourseError::DuplicateOrder(entry.order));
            }

            let exercise_dir = dir.join("exercises").join(&entry.id);
            exercises.push(Exercise {
                id: entry.id.clone(),
                title: entry.title.clone(),
                description: entry.description.clone(),
                order: entry.order,
                source_path: exercise_dir.join(manifest.language.source_file(&entry.id)),
                test_path: exercise_dir.join(manifest.language.test_file(&entry.id)),
                readme_path: exercise_dir.join("README.md"),
            });
        }

        exercises.sort_by_key(|e| e.order);

        info!(
            name = %manifest.name,
            language = %manifest.language,
            exercises = exercises.len(),
            "course loaded"
        );

        Ok(Course {
            name: manifest.name,
            language: manifest.language,
            root: dir.to_path_buf(),
            exercises,
        })
    }

    /// Exercise ids in ordinal order
    pub fn ordered_ids(&self) -> Vec<String> {
        self.exercises.iter().map(|e| e.id.clone()).collect()
    }

    /// Find an exercise by id
    pub fn exercise(&self, id: &str) -> Option<&Exercise> {
        self.exercises.iter().find(|e| e.id == id)
    }

    /// Zero-based position of an exercise in the gating sequence
    pub fn position(&self, id: &str) -> Option<usize> {
        self.exercises.iter().position(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, json: &str) {
        fs::write(dir.join("course.json"), json).unwrap();
    }

    const VALID: &str = r#"{
        "name": "Intro to Python",
        "language": "python",
        "exercises": [
            {"id": "variables", "title": "Variables", "description": "Assign things", "order": 0},
            {"id": "loops", "title": "Loops", "order": 2},
            {"id": "functions", "title": "Functions", "order": 1}
        ]
    }"#;

    #[test]
    fn test_load_sorts_by_order() {
        let temp = tempdir().unwrap();
        write_manifest(temp.path(), VALID);

        let course = Course::load(temp.path()).unwrap();

        assert_eq!(course.name, "Intro to Python");
        assert_eq!(course.language, Language::Python);
        assert_eq!(course.ordered_ids(), vec!["variables", "functions", "loops"]);
    }

    #[test]
    fn test_load_resolves_paths_by_convention() {
        let temp = tempdir().unwrap();
        write_manifest(temp.path(), VALID);

        let course = Course::load(temp.path()).unwrap();
        let ex = course.exercise("variables").unwrap();

        assert!(ex.source_path.ends_with("exercises/variables/variables.py"));
        assert!(ex.test_path.ends_with("exercises/variables/test_variables.py"));
        assert!(ex.readme_path.ends_with("exercises/variables/README.md"));
    }

    #[test]
    fn test_load_rejects_duplicate_id() {
        let temp = tempdir().unwrap();
        write_manifest(
            temp.path(),
            r#"{"name": "c", "language": "go", "exercises": [
                {"id": "a", "title": "A", "order": 0},
                {"id": "a", "title": "A again", "order": 1}
            ]}"#,
        );

        let err = Course::load(temp.path()).unwrap_err();
        assert!(matches!(err, CourseError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn test_load_rejects_duplicate_order() {
        let temp = tempdir().unwrap();
        write_manifest(
            temp.path(),
            r#"{"name": "c", "language": "go", "exercises": [
                {"id": "a", "title": "A", "order": 0},
                {"id": "b", "title": "B", "order": 0}
            ]}"#,
        );

        let err = Course::load(temp.path()).unwrap_err();
        assert!(matches!(err, CourseError::DuplicateOrder(0)));
    }

    #[test]
    fn test_load_rejects_unknown_language() {
        let temp = tempdir().unwrap();
        write_manifest(
            temp.path(),
            r#"{"name": "c", "language": "cobol", "exercises": [
                {"id": "a", "title": "A", "order": 0}
            ]}"#,
        );

        assert!(matches!(Course::load(temp.path()), Err(CourseError::Parse(_))));
    }

    #[test]
    fn test_load_rejects_empty_course() {
        let temp = tempdir().unwrap();
        write_manifest(temp.path(), r#"{"name": "c", "language": "rust", "exercises": []}"#);

        assert!(matches!(Course::load(temp.path()), Err(CourseError::NoExercises)));
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!(Language::from_str("javascript").unwrap(), Language::Javascript);
        assert_eq!(Language::from_str("PY").unwrap(), Language::Python);
        assert!(Language::from_str("cobol").is_err());
    }

    #[test]
    fn test_language_profiles() {
        assert_eq!(Language::Javascript.profile().program, "npx");
        assert_eq!(Language::Python.profile().test_glob, "test_*.py");
        assert_eq!(Language::Go.profile().source_extension, "go");
        assert_eq!(Language::Rust.profile().base_args, &["test"]);
    }

    #[test]
    fn test_test_file_names() {
        assert_eq!(Language::Javascript.test_file("sum"), "sum.test.js");
        assert_eq!(Language::Python.test_file("sum"), "test_sum.py");
        assert_eq!(Language::Go.test_file("sum"), "sum_test.go");
        assert_eq!(Language::Rust.test_file("sum"), "sum_test.rs");
    }
}
