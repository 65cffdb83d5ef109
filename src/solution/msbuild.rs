//! Regex-based MSBuild solution/project parser.
//!
//! Covers the subset of the `.sln` and `.csproj` formats the compliance
//! rules look at. Project files are read line-oriented with compiled
//! regexes; attribute order inside a tag does not matter.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{NullableSetting, OutputType, PackageReference, ProjectFormat, SdkType};

use super::{ProjectDescriptor, ProjectDetails, SolutionDescriptor, SolutionModel};

/// Classic C# project type guid (known MSBuild format).
const CSPROJ_GUID: &str = "FAE04EC0-301F-11D3-BF4B-00C04F79EFBC";
/// SDK-style C# project type guid (known MSBuild format).
const CSPROJ_SDK_GUID: &str = "9A19103F-16F7-4668-BE54-9A1E7A4F7556";
/// Solution folders and website projects use formats newer than MSBuild;
/// the crawl ignores them.
const SOLUTION_FOLDER_GUID: &str = "2150E333-8FDC-42A3-9474-1A3956D46DE8";
const WEBSITE_GUID: &str = "E24C65DC-7377-472B-9ABA-BC803B73C61A";

static SLN_PROJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^Project\("\{(?P<type>[0-9A-Fa-f-]+)\}"\)\s*=\s*"(?P<name>[^"]+)",\s*"(?P<path>[^"]+)",\s*"\{(?P<guid>[0-9A-Fa-f-]+)\}""#,
    )
    .expect("solution project regex")
});

static SLN_DEPENDENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\{(?P<dep>[0-9A-Fa-f-]+)\}\s*=\s*\{[0-9A-Fa-f-]+\}")
        .expect("solution dependency regex")
});

static PROJECT_SDK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<Project\s+[^>]*Sdk\s*=\s*"[^"]+""#).expect("sdk regex"));

static PROJECT_TOOLS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<Project\s+[^>]*ToolsVersion\s*=\s*"[^"]+""#).expect("tools regex"));

static OUTPUT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<OutputType>\s*([A-Za-z]+)\s*</OutputType>").expect("output regex"));

static LANG_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<LangVersion>\s*([^<\s]+)\s*</LangVersion>").expect("lang regex"));

static NULLABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Nullable>\s*([A-Za-z]+)\s*</Nullable>").expect("nullable regex"));

static NEUTRAL_LANGUAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<NeutralLanguage>\s*([^<\s]+)\s*</NeutralLanguage>").expect("language regex")
});

static WARNINGS_AS_ERRORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<TreatWarningsAsErrors>\s*[Tt]rue\s*</TreatWarningsAsErrors>")
        .expect("warnings regex")
});

static EDITORCONFIG_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Link\s*=\s*"[^"]*\.editorconfig""#).expect("editorconfig regex")
});

static PACKAGE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<PackageReference\b[^>]*>").expect("package regex"));

static PROJECT_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<ProjectReference\s+[^>]*Include\s*=\s*"(?P<path>[^"]+)""#)
        .expect("project reference regex")
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<key>[A-Za-z]+)\s*=\s*"(?P<value>[^"]*)""#).expect("attribute regex")
});

/// Default [`SolutionModel`] implementation for MSBuild solutions.
#[derive(Debug, Default)]
pub struct MsBuildSolutionModel;

impl MsBuildSolutionModel {
    pub fn new() -> Self {
        Self
    }
}

impl SolutionModel for MsBuildSolutionModel {
    fn parse_solution(&self, name: &str, text: &str) -> SolutionDescriptor {
        let mut projects = Vec::new();
        let mut guid_to_name: HashMap<String, String> = HashMap::new();
        // Dependency guids per project, resolved to names once all projects
        // are known.
        let mut declared: Vec<Vec<String>> = Vec::new();

        // Split into per-project blocks: a Project(...) header up to the
        // matching EndProject line.
        let mut current: Option<usize> = None;
        for line in text.lines() {
            if let Some(capture) = SLN_PROJECT.captures(line) {
                let type_guid = capture["type"].to_uppercase();
                let format = match type_guid.as_str() {
                    CSPROJ_GUID | CSPROJ_SDK_GUID => ProjectFormat::MsBuild,
                    SOLUTION_FOLDER_GUID | WEBSITE_GUID => ProjectFormat::NewerThanMsBuild,
                    _ => ProjectFormat::Unknown,
                };
                let guid = format!("{{{}}}", capture["guid"].to_uppercase());
                guid_to_name.insert(guid.clone(), capture["name"].to_string());
                projects.push(ProjectDescriptor {
                    name: capture["name"].to_string(),
                    guid,
                    relative_path: capture["path"].to_string(),
                    format,
                    project_references: Vec::new(),
                });
                declared.push(Vec::new());
                current = Some(projects.len() - 1);
            } else if line.trim() == "EndProject" {
                current = None;
            } else if let Some(index) = current {
                if let Some(capture) = SLN_DEPENDENCY.captures(line) {
                    declared[index].push(format!("{{{}}}", capture["dep"].to_uppercase()));
                }
            }
        }

        for (index, guids) in declared.into_iter().enumerate() {
            for guid in guids {
                if let Some(name) = guid_to_name.get(&guid) {
                    projects[index].project_references.push(name.clone());
                }
            }
        }

        SolutionDescriptor {
            name: name.to_string(),
            projects,
        }
    }

    fn parse_project(&self, content: &[u8]) -> ProjectDetails {
        let text = String::from_utf8_lossy(content);
        let mut details = ProjectDetails::default();

        if PROJECT_SDK.is_match(&text) {
            details.sdk_type = SdkType::Sdk;
            // SDK-style projects default to building a library.
            details.output_type = OutputType::Library;
        } else if PROJECT_TOOLS.is_match(&text) {
            details.sdk_type = SdkType::Legacy;
        }

        if let Some(capture) = OUTPUT_TYPE.captures(&text) {
            details.output_type = match capture.get(1).map(|m| m.as_str()) {
                Some("Exe") => OutputType::Console,
                Some("WinExe") => OutputType::WinExe,
                Some("Library") => OutputType::Library,
                _ => OutputType::Unknown,
            };
        }

        if let Some(capture) = LANG_VERSION.captures(&text) {
            details.language_version = capture[1].to_string();
        }

        if let Some(capture) = NULLABLE.captures(&text) {
            details.nullable = match capture[1].to_lowercase().as_str() {
                "enable" => NullableSetting::Enable,
                "warnings" => NullableSetting::Warnings,
                "annotations" => NullableSetting::Annotations,
                _ => NullableSetting::None,
            };
        }

        if let Some(capture) = NEUTRAL_LANGUAGE.captures(&text) {
            details.neutral_language = capture[1].to_string();
        }

        details.warnings_as_errors = WARNINGS_AS_ERRORS.is_match(&text);
        details.editorconfig_linked = EDITORCONFIG_LINK.is_match(&text);

        for tag in PACKAGE_REFERENCE.find_iter(&text) {
            let mut name = String::new();
            let mut version = String::new();
            let mut condition = String::new();
            for attribute in ATTRIBUTE.captures_iter(tag.as_str()) {
                match &attribute["key"] {
                    "Include" => name = attribute["value"].to_string(),
                    "Version" => version = attribute["value"].to_string(),
                    "Condition" => condition = attribute["value"].to_string(),
                    _ => {}
                }
            }
            if !name.is_empty() {
                details.package_references.push(PackageReference { name, version, condition });
            }
        }

        for capture in PROJECT_REFERENCE.captures_iter(&text) {
            if let Some(stem) = file_stem(&capture["path"]) {
                details.project_references.push(stem);
            }
        }

        details
    }
}

/// File name without its extension, from a path with either separator.
fn file_stem(path: &str) -> Option<String> {
    let name = path.rsplit(['\\', '/']).next()?;
    let stem = name.strip_suffix(".csproj").unwrap_or(name);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}
