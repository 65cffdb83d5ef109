//! Cross-project package rules.
//!
//! These run once per full validation pass over *all* projects, regardless
//! of per-repository checked state, because they compare package references
//! across repository boundaries. The pass is O(projects) with no network
//! calls, so re-deriving it after every activity event is cheap.

use std::collections::BTreeMap;

use crate::model::{AuditModel, ProjectIndex};

/// Condition required on the release reference of a Debug/Release pair.
pub const RELEASE_CONDITION: &str = "'$(Configuration)|$(Platform)'!='Debug|x64'";
/// Condition required on the `-Debug` reference of a Debug/Release pair.
pub const DEBUG_CONDITION: &str = "'$(Configuration)|$(Platform)'=='Debug|x64'";

const DEBUG_SUFFIX: &str = "-Debug";

/// For every distinct package name referenced anywhere, collect all
/// referenced versions; more than one distinct version is a package-level
/// violation naming the min/max, and every project not on the max version
/// is invalidated.
pub fn validate_reference_versions(model: &mut AuditModel) {
    let mut versions: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for project in &model.projects {
        for reference in &project.package_references {
            let list = versions.entry(reference.name.clone()).or_default();
            if !list.contains(&reference.version) {
                list.push(reference.version.clone());
            }
        }
    }

    for list in versions.values_mut() {
        list.sort();
    }

    for (name, list) in versions {
        if list.len() > 1 {
            let min_version = &list[0];
            let max_version = &list[list.len() - 1];
            model.add_package_violation(format!(
                "Package {name} referenced with several versions from {min_version} to {max_version}"
            ));
            invalidate_projects_with_old_version(model, &name, max_version);
        }
    }
}

fn invalidate_projects_with_old_version(model: &mut AuditModel, name: &str, max_version: &str) {
    for index in 0..model.projects.len() {
        let outdated = model.projects[index]
            .package_references
            .iter()
            .any(|reference| reference.name == name && reference.version != max_version);
        if outdated {
            model.invalidate_project(ProjectIndex(index));
        }
    }
}

/// Every package with a `-Debug` suffixed sibling must be referenced
/// together with its base package, under mutually exclusive Debug/Release
/// MSBuild conditions. Any mismatch is a per-project violation.
pub fn validate_reference_conditions(model: &mut AuditModel) {
    let short_names = package_short_names(model);

    for index in 0..model.projects.len() {
        validate_project_conditions(model, ProjectIndex(index), &short_names);
    }
}

/// Base names of every `-Debug` suffixed package referenced anywhere.
fn package_short_names(model: &AuditModel) -> Vec<String> {
    let mut names = Vec::new();
    for project in &model.projects {
        for reference in &project.package_references {
            if let Some(short) = reference.name.strip_suffix(DEBUG_SUFFIX) {
                if !names.contains(&short.to_string()) {
                    names.push(short.to_string());
                }
            }
        }
    }
    names
}

fn validate_project_conditions(model: &mut AuditModel, project: ProjectIndex, short_names: &[String]) {
    let mut paired = Vec::new();

    for short in short_names {
        let debug_name = format!("{short}{DEBUG_SUFFIX}");
        let has_main = model.projects[project.0]
            .package_references
            .iter()
            .any(|reference| reference.name == *short);
        let has_debug = model.projects[project.0]
            .package_references
            .iter()
            .any(|reference| reference.name == debug_name);

        if has_main && has_debug {
            paired.push(short.clone());
        } else if has_main || has_debug {
            let project_name = model.projects[project.0].name.clone();
            let text = if has_debug {
                format!("Project {project_name} has package {short}{DEBUG_SUFFIX} but no release version")
            } else {
                format!("Project {project_name} has package {short} but no debug version")
            };
            add_project_violation(model, project, text);
            model.invalidate_project(project);
        }
    }

    for short in paired {
        let debug_name = format!("{short}{DEBUG_SUFFIX}");
        let mismatched: Vec<(String, String)> = model.projects[project.0]
            .package_references
            .iter()
            .filter(|reference| {
                (reference.name == short && reference.condition != RELEASE_CONDITION)
                    || (reference.name == debug_name && reference.condition != DEBUG_CONDITION)
            })
            .map(|reference| (reference.name.clone(), reference.condition.clone()))
            .collect();

        for (name, condition) in mismatched {
            let project_name = model.projects[project.0].name.clone();
            add_project_violation(
                model,
                project,
                format!("Project {project_name} use package {name} but with wrong condition {condition}"),
            );
            model.invalidate_project(project);
        }
    }
}

/// Project-scoped findings are recorded against the owning repository.
fn add_project_violation(model: &mut AuditModel, project: ProjectIndex, text: String) {
    let solution = model.projects[project.0].solution;
    let repository = model.solutions[solution.0].repository;
    model.add_repository_violation(repository, text);
}
