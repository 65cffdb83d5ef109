//! The compliance policy: what every repository, solution, and project must
//! look like.

/// A file the policy pins by name and exact content.
#[derive(Debug, Clone)]
pub struct PolicyFile {
    pub name: String,
    pub content: Vec<u8>,
}

/// The two accepted CI configuration variants: one for repositories whose
/// main project is an executable, one for libraries.
#[derive(Debug, Clone)]
pub struct CiTemplates {
    pub executable: Vec<u8>,
    pub library: Vec<u8>,
}

/// Repository path of the CI configuration file.
pub const CI_FILE_PATH: &str = "/appveyor.yml";

/// Project exempt from the quality rules (it deliberately targets the
/// build host rather than the product).
pub const PREBUILD_PROJECT: &str = "PreBuild";

/// Everything the validation engine checks against.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub mandatory_repository_files: Vec<PolicyFile>,
    pub mandatory_project_files: Vec<PolicyFile>,
    pub forbidden_project_files: Vec<String>,
    pub mandatory_ignore_lines: Vec<String>,
    pub mandatory_dependent_projects: Vec<String>,
    pub continuous_integration: Option<CiTemplates>,
    /// Required `<LangVersion>` value.
    pub language_version: String,
    /// Required `<NeutralLanguage>` locale.
    pub neutral_language: String,
}

impl Policy {
    pub fn new(language_version: impl Into<String>, neutral_language: impl Into<String>) -> Self {
        Self {
            language_version: language_version.into(),
            neutral_language: neutral_language.into(),
            ..Self::default()
        }
    }

    pub fn add_mandatory_repository_file(&mut self, name: impl Into<String>, content: Vec<u8>) {
        self.mandatory_repository_files.push(PolicyFile { name: name.into(), content });
    }

    pub fn add_mandatory_project_file(&mut self, name: impl Into<String>, content: Vec<u8>) {
        self.mandatory_project_files.push(PolicyFile { name: name.into(), content });
    }

    pub fn add_forbidden_project_file(&mut self, name: impl Into<String>) {
        self.forbidden_project_files.push(name.into());
    }

    pub fn add_mandatory_ignore_line(&mut self, line: impl Into<String>) {
        self.mandatory_ignore_lines.push(line.into());
    }

    pub fn add_mandatory_dependent_project(&mut self, name: impl Into<String>) {
        self.mandatory_dependent_projects.push(name.into());
    }

    pub fn set_continuous_integration(&mut self, executable: Vec<u8>, library: Vec<u8>) {
        self.continuous_integration = Some(CiTemplates { executable, library });
    }
}

/// Byte-level content comparison that treats `\r\n` and `\n` as equivalent:
/// a `\r` immediately preceding another byte is skipped on either side, so a
/// trailing `\r` never causes a length mismatch.
pub fn content_equal(left: &[u8], right: &[u8]) -> bool {
    let (mut i, mut j) = (0usize, 0usize);
    while i < left.len() && j < right.len() {
        let mut a = left[i];
        if a == b'\r' && i + 1 < left.len() {
            i += 1;
            a = left[i];
        }
        let mut b = right[j];
        if b == b'\r' && j + 1 < right.len() {
            j += 1;
            b = right[j];
        }
        if a != b {
            return false;
        }
        i += 1;
        j += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_and_lf_content_compare_equal() {
        assert!(content_equal(b"line one\r\nline two\r\n", b"line one\nline two\n"));
        assert!(content_equal(b"line one\nline two\n", b"line one\r\nline two\r\n"));
    }

    #[test]
    fn trailing_carriage_return_is_immune_to_length_mismatch() {
        assert!(content_equal(b"content\r", b"content\r"));
        assert!(content_equal(b"content\r\n", b"content\n"));
    }

    #[test]
    fn different_content_compares_unequal() {
        assert!(!content_equal(b"alpha\n", b"beta\n"));
        assert!(!content_equal(b"same\nbut different", b"same\nbut other"));
    }

    #[test]
    fn identical_bytes_compare_equal() {
        assert!(content_equal(b"", b""));
        assert!(content_equal(b"exact", b"exact"));
    }
}
