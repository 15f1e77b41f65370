/// Route patterns used to normalise request paths.
///
/// A pattern is a `/` separated list of segments. `:name` matches any single
/// non-empty segment and `*` matches the rest of the path. Literal segments
/// match ignoring ASCII case, and a trailing slash on the path is ignored.
#[derive(Debug, Clone, Default)]
pub struct PathPatterns {
    patterns: Vec<Pattern>,
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    Rest,
}

impl PathPatterns {
    /// Compile `patterns`. `:name` matches one segment and `*` the rest of the path.
    pub fn new<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(|source| {
                let source = source.into();
                let segments = split(&source)
                    .map(|segment| match segment {
                        "*" => Segment::Rest,
                        param if param.starts_with(':') => Segment::Param,
                        literal => Segment::Literal(literal.to_owned()),
                    })
                    .collect();
                Pattern { source, segments }
            })
            .collect();
        Self { patterns }
    }

    /// The first pattern matching `path`.
    pub fn find(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| pattern.matches(path))
            .map(|pattern| pattern.source.as_str())
    }

    /// The first pattern matching `path`, or `path` itself.
    pub fn normalize<'a>(&'a self, path: &'a str) -> &'a str {
        self.find(path).unwrap_or(path)
    }

    /// Whether there are no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Pattern {
    fn matches(&self, path: &str) -> bool {
        let mut path = split(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Param => match path.next() {
                    Some(value) if !value.is_empty() => {}
                    _ => return false,
                },
                Segment::Literal(literal) => match path.next() {
                    Some(value) if value.eq_ignore_ascii_case(literal) => {}
                    _ => return false,
                },
            }
        }
        path.next().is_none()
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    path.split('/').filter(move |_| !path.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_single_segments() {
        let patterns = PathPatterns::new(["/users/:id", "/users/:id/posts/:post"]);

        assert_eq!(patterns.find("/users/42"), Some("/users/:id"));
        assert_eq!(patterns.find("/users/42/"), Some("/users/:id"));
        assert_eq!(patterns.find("/USERS/42"), Some("/users/:id"));
        assert_eq!(patterns.find("/users/42/posts/7"), Some("/users/:id/posts/:post"));
        assert_eq!(patterns.find("/users"), None);
        assert_eq!(patterns.find("/users//posts/7"), None);
        assert_eq!(patterns.find("/users/42/comments"), None);
    }

    #[test]
    fn rest_matches_anything_after() {
        let patterns = PathPatterns::new(["/static/*"]);

        assert_eq!(patterns.find("/static/css/site.css"), Some("/static/*"));
        assert_eq!(patterns.find("/static"), Some("/static/*"));
        assert_eq!(patterns.find("/other/css"), None);
    }

    #[test]
    fn first_match_wins() {
        let patterns = PathPatterns::new(["/users/me", "/users/:id"]);

        assert_eq!(patterns.normalize("/users/me"), "/users/me");
        assert_eq!(patterns.normalize("/users/7"), "/users/:id");
        assert_eq!(patterns.normalize("/teams/7"), "/teams/7");
    }

    #[test]
    fn root_path() {
        let patterns = PathPatterns::new(["/"]);

        assert_eq!(patterns.find("/"), Some("/"));
        assert_eq!(patterns.find("/x"), None);
    }
}
