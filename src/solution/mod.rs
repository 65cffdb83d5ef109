//! Solution-model boundary.
//!
//! Solution and project file parsing is a collaborator, not part of the
//! audit engine: the crawler hands solution text and project file bytes to a
//! [`SolutionModel`] and gets structured descriptors back. The crate ships a
//! regex-based MSBuild implementation in [`msbuild`]; tests substitute
//! canned descriptors.

pub mod msbuild;

use crate::model::{NullableSetting, OutputType, PackageReference, ProjectFormat, SdkType};

/// A project as declared in a solution file.
#[derive(Debug, Clone)]
pub struct ProjectDescriptor {
    pub name: String,
    pub guid: String,
    /// Path of the project file relative to the repository root, as written
    /// in the solution (may contain backslashes).
    pub relative_path: String,
    pub format: ProjectFormat,
    /// Names of sibling projects this project depends on, as declared in the
    /// solution's dependency sections.
    pub project_references: Vec<String>,
}

/// A parsed solution: an ordered set of project descriptors.
#[derive(Debug, Clone)]
pub struct SolutionDescriptor {
    pub name: String,
    pub projects: Vec<ProjectDescriptor>,
}

/// Details read from a project file's content.
#[derive(Debug, Clone)]
pub struct ProjectDetails {
    pub output_type: OutputType,
    pub sdk_type: SdkType,
    pub language_version: String,
    pub nullable: NullableSetting,
    pub neutral_language: String,
    pub editorconfig_linked: bool,
    pub warnings_as_errors: bool,
    pub package_references: Vec<PackageReference>,
    /// Names of referenced sibling projects (file stems of
    /// `<ProjectReference>` includes).
    pub project_references: Vec<String>,
}

impl Default for ProjectDetails {
    fn default() -> Self {
        Self {
            output_type: OutputType::Unknown,
            sdk_type: SdkType::Unknown,
            language_version: String::new(),
            nullable: NullableSetting::None,
            neutral_language: String::new(),
            editorconfig_linked: false,
            warnings_as_errors: false,
            package_references: Vec::new(),
            project_references: Vec::new(),
        }
    }
}

/// Turns raw solution/project file content into structured metadata.
pub trait SolutionModel: Send + Sync {
    /// Parse a solution file's text into its ordered project descriptors.
    fn parse_solution(&self, name: &str, text: &str) -> SolutionDescriptor;

    /// Populate project details from the project file's raw content.
    fn parse_project(&self, content: &[u8]) -> ProjectDetails;
}
