// Local crates
use crate::manifest::manifest::ManifestError;

// External crates
use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Search `base_directory` recursively for files matching any of `patterns`.
///
/// A pattern matches a file when it matches the trailing components of the
/// file's path relative to `base_directory`, so `*.tif` finds tifs at any
/// depth and `sorted_local_z_stacks/*.tif` finds them only inside a
/// `sorted_local_z_stacks` directory. Only paths containing
/// `extra_search_key` are kept. Results follow pattern order, are sorted
/// within a pattern, and contain no duplicates.
pub fn search_files(
    base_directory: &Path,
    patterns: &[String],
    extra_search_key: &str,
) -> Result<Vec<String>, ManifestError> {
    let compiled = patterns
        .iter()
        .map(|p| {
            Pattern::new(&format!("**/{p}")).map_err(|source| ManifestError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let files: Vec<(String, String)> = WalkDir::new(base_directory)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(base_directory).ok()?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Some((relative, entry.path().to_string_lossy().into_owned()))
        })
        .filter(|(_, full)| full.contains(extra_search_key))
        .collect();

    let mut seen = HashSet::new();
    let mut matched = Vec::new();
    for pattern in &compiled {
        let mut hits: Vec<&String> = files
            .iter()
            .filter(|(relative, _)| pattern.matches_with(relative, MATCH_OPTIONS))
            .map(|(_, full)| full)
            .collect();
        hits.sort();

        for hit in hits {
            if seen.insert(hit.clone()) {
                matched.push(hit.clone());
            }
        }
    }

    Ok(matched)
}
