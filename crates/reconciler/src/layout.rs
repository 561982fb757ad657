//! Source file layout conventions derived from the runtime name.

/// Prefix of the mounted source file and of the handler path.
const SOURCE_BASENAME: &str = "source";

/// Where the source lands inside the runtime container and how it is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    /// Extension the runtime expects, without the dot.
    pub file_extension: &'static str,
    /// `source.<ext>`
    pub mounted_file_name: String,
    /// `source.<entrypoint>`
    pub handler: String,
}

impl SourceLayout {
    /// Layout for a runtime alias and handler entrypoint.
    #[must_use]
    pub fn resolve(runtime: &str, entrypoint: &str) -> Self {
        let file_extension = file_extension(runtime);
        Self {
            file_extension,
            mounted_file_name: format!("{SOURCE_BASENAME}.{file_extension}"),
            handler: format!("{SOURCE_BASENAME}.{entrypoint}"),
        }
    }
}

/// Extension the runtime's loader expects.
///
/// Unrecognised runtimes fall back to `txt` and leave interpretation to the
/// runtime image.
#[must_use]
pub fn file_extension(runtime: &str) -> &'static str {
    let runtime = runtime.to_lowercase();
    if runtime.contains("python") {
        "py"
    } else if runtime.contains("node") || runtime.contains("js") {
        "js"
    } else if runtime.contains("ruby") {
        "rb"
    } else if runtime.contains("sh") {
        "sh"
    } else {
        "txt"
    }
}
