//! Extension allow-list.

/// Decides whether a path is in scope by suffix.
///
/// Matching is case-sensitive and applies to the whole path string, so
/// `folder.jpg/real_file.txt` does not match `.jpg`.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(Into::into)
                .filter(|e: &String| !e.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, path: &str) -> bool {
        self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_matching_on_full_path() {
        let filter = ExtensionFilter::new([".jpg", ".JPG", ".mp4"]);
        let cases = [
            ("photo.jpg", true),
            ("photo.JPG", true),
            ("video.mp4", true),
            ("document.txt", false),
            ("image.png", false),
            ("folder.jpg/real_file.txt", false),
            ("/absolute/path/to/photo.jpg", true),
        ];
        for (path, expected) in cases {
            assert_eq!(filter.allows(path), expected, "allows({path:?})");
        }
    }

    #[test]
    fn matching_is_case_sensitive() {
        let filter = ExtensionFilter::new([".jpg"]);
        assert!(!filter.allows("photo.Jpg"));
    }

    #[test]
    fn empty_entries_are_dropped() {
        let filter = ExtensionFilter::new(["", ".arw"]);
        assert_eq!(filter.extensions(), &[".arw".to_string()]);
        assert!(!filter.allows("anything"));
        assert!(!ExtensionFilter::default().allows("photo.jpg"));
        assert!(ExtensionFilter::default().is_empty());
    }
}
