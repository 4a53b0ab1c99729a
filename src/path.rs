//! Path canonicalization and path template compilation.
//!
//! Templates are literal segments separated by `/`, where `:name` captures
//! one segment and a trailing `*` or `*name` captures the rest of the path.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

use crate::error::{MockError, Result};

/// Parameter name under which the wildcard remainder is always stored.
pub const WILDCARD_PARAM: &str = "*";

/// Route parameters captured from a request path.
pub type RouteParams = HashMap<String, String>;

/// Return the canonical form of a URL path.
///
/// Repeated slashes collapse, `.` elements are dropped and `..` removes the
/// preceding element (never climbing above the root). A trailing slash is
/// kept, and an empty path becomes `/`. Applying it twice is a no-op.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut trailing = path.len() > 1 && path.ends_with('/');
    let mut stack: Vec<&str> = Vec::new();
    let mut segments = path.split('/').peekable();

    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        match segment {
            "" => {}
            "." => {
                if is_last {
                    trailing = true;
                }
            }
            ".." => {
                stack.pop();
            }
            element => stack.push(element),
        }
    }

    let mut cleaned = String::with_capacity(path.len() + 1);
    for element in &stack {
        cleaned.push('/');
        cleaned.push_str(element);
    }
    if cleaned.is_empty() {
        cleaned.push('/');
    } else if trailing {
        cleaned.push('/');
    }
    cleaned
}

/// Compile-time options for [`compile_path`].
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    case_sensitive: bool,
    end: bool,
}

impl CompileOptions {
    /// Case-sensitive, anchored at the end of the path.
    pub fn new() -> Self {
        Self {
            case_sensitive: true,
            end: true,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// When false the pattern matches any path that starts with the
    /// template on a segment boundary.
    pub fn end(mut self, end: bool) -> Self {
        self.end = end;
        self
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    regex: Regex,
    /// Named parameters in declaration order, then `*` if a wildcard exists
    params: Vec<String>,
    /// Declared wildcard name (`filepath` in `*filepath`)
    wildcard_name: Option<String>,
    has_wildcard: bool,
}

impl PathPattern {
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn as_regex(&self) -> &Regex {
        &self.regex
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Whether the template declares any `:name` segments.
    pub fn has_params(&self) -> bool {
        self.params.len() > usize::from(self.has_wildcard)
    }

    pub fn has_wildcard(&self) -> bool {
        self.has_wildcard
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match `path` and return the captured route parameters.
    ///
    /// The wildcard remainder excludes its leading `/` and is stored under
    /// `*`; a named wildcard is stored under its name as well.
    pub fn captures(&self, path: &str) -> Option<RouteParams> {
        let captures = self.regex.captures(path)?;
        let mut params = RouteParams::with_capacity(self.params.len() + 1);

        for (i, name) in self.params.iter().enumerate() {
            let value = captures
                .get(i + 1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            params.insert(name.clone(), value);
        }

        if let Some(name) = &self.wildcard_name {
            if let Some(value) = params.get(WILDCARD_PARAM).cloned() {
                params.insert(name.clone(), value);
            }
        }

        Some(params)
    }
}

/// Compile a path template into a matcher and its ordered parameter names.
pub fn compile_path(template: &str, options: CompileOptions) -> Result<PathPattern> {
    let invalid = |reason: &str| MockError::InvalidPattern {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let canonical = clean_path(template);
    let segments: Vec<&str> = canonical.split('/').filter(|s| !s.is_empty()).collect();

    let mut source = String::from("^");
    let mut params: Vec<String> = Vec::new();
    let mut wildcard_name = None;
    let mut has_wildcard = false;

    for (i, segment) in segments.iter().enumerate() {
        if segment.contains('*') {
            if i + 1 != segments.len() || !segment.starts_with('*') {
                return Err(invalid("wildcard is only allowed as the final segment"));
            }
            let name = &segment[1..];
            if !name.chars().all(is_word_char) {
                return Err(invalid("wildcard name must be alphanumeric"));
            }
            if !name.is_empty() {
                wildcard_name = Some(name.to_string());
            }
            has_wildcard = true;
            continue;
        }

        source.push('/');
        compile_segment(segment, &mut source, &mut params);
    }

    if has_wildcard {
        params.push(WILDCARD_PARAM.to_string());
        source.push_str("(?:/(.+)|/*)$");
    } else if options.end {
        source.push_str("/*$");
    } else {
        source.push_str("(?:/.*)?$");
    }

    let mut seen = std::collections::HashSet::new();
    for name in params.iter().chain(wildcard_name.iter()) {
        if !seen.insert(name.as_str()) {
            return Err(invalid(&format!("duplicate parameter `{}`", name)));
        }
    }

    let regex = RegexBuilder::new(&source)
        .case_insensitive(!options.case_sensitive)
        .build()
        .map_err(|e| invalid(&e.to_string()))?;

    Ok(PathPattern {
        template: canonical,
        regex,
        params,
        wildcard_name,
        has_wildcard,
    })
}

/// Append one literal segment to `source`, turning `:name` tokens into
/// single-segment capture groups.
fn compile_segment(segment: &str, source: &mut String, params: &mut Vec<String>) {
    let mut literal = String::new();
    let mut chars = segment.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == ':' && chars.peek().copied().is_some_and(is_word_char) {
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if !is_word_char(next) {
                    break;
                }
                name.push(next);
                chars.next();
            }
            source.push_str(&regex::escape(&literal));
            literal.clear();
            source.push_str("([^/]+)");
            params.push(name);
        } else {
            literal.push(ch);
        }
    }

    source.push_str(&regex::escape(&literal));
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(template: &str) -> PathPattern {
        compile_path(template, CompileOptions::new()).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> RouteParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_clean_path() {
        let cases = [
            ("", "/"),
            ("/", "/"),
            ("abc", "/abc"),
            ("//abc//def", "/abc/def"),
            ("/abc/def/", "/abc/def/"),
            ("/abc/./def", "/abc/def"),
            ("/abc/def/.", "/abc/def/"),
            ("/abc/def/..", "/abc"),
            ("/abc/def/../ghi", "/abc/ghi"),
            ("/../abc", "/abc"),
            ("/abc/../../", "/"),
            ("////aaaaa/:var1", "/aaaaa/:var1"),
        ];
        for (input, expected) in cases {
            assert_eq!(clean_path(input), expected, "clean_path({:?})", input);
        }
    }

    #[test]
    fn test_clean_path_is_idempotent() {
        for input in ["", "a//b/../c/.", "/x/./y//", "/../../z", "/src/*filepath"] {
            let once = clean_path(input);
            assert_eq!(clean_path(&once), once);
        }
    }

    #[test]
    fn test_compiled_regex_source() {
        let cases = [
            ("/cmd/:tool/:sub", r"^/cmd/([^/]+)/([^/]+)/*$", vec!["tool", "sub"]),
            ("/order/:id", r"^/order/([^/]+)/*$", vec!["id"]),
            (
                "/info/hehe:user/project/:project",
                r"^/info/hehe([^/]+)/project/([^/]+)/*$",
                vec!["user", "project"],
            ),
            (
                "////info/:user/project/:project/*",
                r"^/info/([^/]+)/project/([^/]+)(?:/(.+)|/*)$",
                vec!["user", "project", "*"],
            ),
            ("/doc/go1.html", r"^/doc/go1\.html/*$", vec![]),
            ("/*", r"^(?:/(.+)|/*)$", vec!["*"]),
        ];
        for (template, expected, names) in cases {
            let pattern = compile(template);
            assert_eq!(pattern.as_regex().as_str(), expected, "{}", template);
            assert_eq!(pattern.params(), names.as_slice(), "{}", template);
        }
    }

    #[test]
    fn test_named_params() {
        let pattern = compile("/info/:user/project/:project");
        assert!(pattern.has_params());
        assert!(!pattern.has_wildcard());
        assert_eq!(
            pattern.captures("/info/gordon/project/go"),
            Some(params(&[("user", "gordon"), ("project", "go")]))
        );

        let pattern = compile("/cmd/:tool/:sub");
        assert_eq!(
            pattern.captures("/cmd/test/3"),
            Some(params(&[("tool", "test"), ("sub", "3")]))
        );
        assert_eq!(
            pattern.captures("/cmd/test/3/"),
            Some(params(&[("tool", "test"), ("sub", "3")]))
        );
        assert!(pattern.captures("/cmd/test").is_none());
        assert!(pattern.captures("/cmd/test/3/4").is_none());
    }

    #[test]
    fn test_exact_path_accepts_trailing_slash() {
        let pattern = compile("/search/");
        assert!(!pattern.has_params());
        assert!(pattern.is_match("/search"));
        assert!(pattern.is_match("/search/"));
        assert!(!pattern.is_match("/search/x"));
        assert_eq!(pattern.captures("/search"), Some(RouteParams::new()));
    }

    #[test]
    fn test_wildcard_capture_boundary() {
        let pattern = compile("/src/*filepath");
        assert!(pattern.has_wildcard());
        assert!(!pattern.has_params());
        assert_eq!(pattern.params(), ["*"]);

        let cases = [
            ("/src/some/file.png", Some("some/file.png")),
            ("/src/file.png", Some("file.png")),
            ("/src/", Some("")),
            ("/src", Some("")),
            ("/srcfile", None),
            ("/other/file", None),
        ];
        for (path, expected) in cases {
            let captured = pattern.captures(path);
            match expected {
                Some(value) => {
                    let captured = captured.unwrap_or_else(|| panic!("{} should match", path));
                    assert_eq!(captured.get("*").map(String::as_str), Some(value), "{}", path);
                    assert_eq!(
                        captured.get("filepath").map(String::as_str),
                        Some(value),
                        "{}",
                        path
                    );
                }
                None => assert!(captured.is_none(), "{} should not match", path),
            }
        }
    }

    #[test]
    fn test_anonymous_wildcard_with_params() {
        let pattern = compile("/files/:dir/*");
        assert!(pattern.has_params());
        assert!(pattern.has_wildcard());
        assert_eq!(
            pattern.captures("/files/docs/a/b.txt"),
            Some(params(&[("dir", "docs"), ("*", "a/b.txt")]))
        );

        let root = compile("/*");
        assert_eq!(root.captures("/v1/api"), Some(params(&[("*", "v1/api")])));
        assert_eq!(root.captures("/"), Some(params(&[("*", "")])));
    }

    #[test]
    fn test_wildcard_must_be_last() {
        for template in ["/a/*/b", "/a/x*", "/a/*name/b", "/a/*na-me"] {
            assert!(
                matches!(
                    compile_path(template, CompileOptions::new()),
                    Err(MockError::InvalidPattern { .. })
                ),
                "{} should be rejected",
                template
            );
        }
    }

    #[test]
    fn test_duplicate_params_rejected() {
        assert!(compile_path("/a/:id/b/:id", CompileOptions::new()).is_err());
        assert!(compile_path("/a/:id/*id", CompileOptions::new()).is_err());
    }

    #[test]
    fn test_literal_metacharacters_escaped() {
        let pattern = compile("/v1/price(usd)/a+b");
        assert!(pattern.is_match("/v1/price(usd)/a+b"));
        assert!(!pattern.is_match("/v1/priceusd/aab"));
    }

    #[test]
    fn test_case_insensitive_option() {
        let sensitive = compile("/Users/:id");
        assert!(!sensitive.is_match("/users/1"));

        let insensitive =
            compile_path("/Users/:id", CompileOptions::new().case_sensitive(false)).unwrap();
        assert_eq!(
            insensitive.captures("/USERS/Ab"),
            Some(params(&[("id", "Ab")]))
        );
    }

    #[test]
    fn test_prefix_mode() {
        let pattern = compile_path("/api/:version", CompileOptions::new().end(false)).unwrap();
        assert!(pattern.is_match("/api/v1"));
        assert!(pattern.is_match("/api/v1/users/2"));
        assert!(!pattern.is_match("/api"));
        assert!(!pattern.is_match("/apiv1"));
    }
}
