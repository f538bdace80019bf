use globset::{GlobBuilder, GlobMatcher};

use crate::config::ConfigurationError;

/// Glob used to select which distributed files get uploaded.
///
/// A pattern without a `/` is matched against the file name alone, so
/// `*.js` selects `assets/app.js` as well as `app.js`.
#[derive(Clone, Debug)]
pub struct FilePattern {
    matcher: GlobMatcher,
    match_base: bool,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<FilePattern, ConfigurationError> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ConfigurationError::InvalidConfigurationValue {
                key: crate::config::FILE_PATTERN.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(FilePattern {
            matcher: glob.compile_matcher(),
            match_base: !pattern.contains('/'),
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        if self.match_base {
            let base_name = path.rsplit('/').next().unwrap_or(path);
            self.matcher.is_match(base_name)
        } else {
            self.matcher.is_match(path)
        }
    }

    /// Keeps the matching paths, in their original order.
    pub fn filter<S: AsRef<str>>(&self, paths: &[S]) -> Vec<String> {
        paths
            .iter()
            .map(AsRef::as_ref)
            .filter(|p| self.is_match(p))
            .map(str::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DEFAULT_FILE_PATTERN;

    #[test]
    fn test_default_pattern_skips_markdown() {
        let pattern = FilePattern::new(DEFAULT_FILE_PATTERN).unwrap();
        let files = ["app.js", "app.css", "readme.md"];
        assert_eq!(pattern.filter(&files), vec!["app.js", "app.css"]);
    }

    #[test]
    fn test_default_pattern_matches_nested_assets() {
        let pattern = FilePattern::new(DEFAULT_FILE_PATTERN).unwrap();
        assert!(pattern.is_match("assets/vendor-3f2a.js"));
        assert!(pattern.is_match("assets/fonts/icons.woff2"));
        assert!(pattern.is_match("robots.txt"));
        assert!(!pattern.is_match("index.html"));
        assert!(!pattern.is_match("assets/app.js.gz"));
    }

    #[test]
    fn test_pattern_without_slash_matches_base_name() {
        let pattern = FilePattern::new("*.png").unwrap();
        assert!(pattern.is_match("logo.png"));
        assert!(pattern.is_match("images/deep/logo.png"));
        assert!(!pattern.is_match("images/logo.jpg"));
    }

    #[test]
    fn test_pattern_with_slash_matches_full_path() {
        let pattern = FilePattern::new("assets/*.js").unwrap();
        assert!(pattern.is_match("assets/app.js"));
        assert!(!pattern.is_match("app.js"));
        assert!(!pattern.is_match("assets/nested/app.js"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = FilePattern::new("assets/{js,css");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidConfigurationValue { .. })
        ));
    }
}
