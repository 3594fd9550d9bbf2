//! Search query tokenisation and FTS5 query construction.

/// Characters sanitised out of every token before it reaches FTS5: path
/// separators, quotes, and colons become spaces.
const SANITISE_CHARS: &[char] = &['/', '\\', '"', '\'', ':'];

fn sanitise_token(token: &str) -> String {
    token
        .chars()
        .map(|c| if SANITISE_CHARS.contains(&c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A tokenised search query: positive terms all of which must match, and
/// negative terms none of which may match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Positive terms, ANDed together.
    pub include: Vec<String>,
    /// Negative terms, ORed together and excluded.
    pub exclude: Vec<String>,
}

impl SearchQuery {
    /// Parses a raw query string: whitespace-separated terms, a leading
    /// `-` marking a term as an exclusion. Each term is sanitised
    /// (path separators, quotes, colons become spaces) and empty terms
    /// are dropped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for term in raw.split_whitespace() {
            let (is_exclusion, body) = term
                .strip_prefix('-')
                .map_or((false, term), |rest| (true, rest));

            let sanitised = sanitise_token(body);
            if sanitised.is_empty() {
                continue;
            }
            if is_exclusion {
                exclude.push(sanitised);
            } else {
                include.push(sanitised);
            }
        }

        Self { include, exclude }
    }

    /// True if this query has no positive terms (and thus would match
    /// everything, less any exclusions).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Builds the FTS5 `MATCH` expression:
    /// `("t1" AND "t2" …) NOT ("x1" OR "x2" …)`. Returns `None` if there
    /// are no positive terms (FTS5 requires at least one).
    #[must_use]
    pub fn to_fts_expression(&self) -> Option<String> {
        if self.include.is_empty() {
            return None;
        }

        let include = self
            .include
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" AND ");

        if self.exclude.is_empty() {
            return Some(format!("({include})"));
        }

        let exclude = self
            .exclude
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        Some(format!("({include}) NOT ({exclude})"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_positive_and_negative_terms() {
        let query = SearchQuery::parse("foo bar -baz");
        assert_eq!(query.include, vec!["foo", "bar"]);
        assert_eq!(query.exclude, vec!["baz"]);
    }

    #[test]
    fn parse_sanitises_path_separators_quotes_and_colons() {
        let query = SearchQuery::parse("a/b\\c \"d\" e:f");
        assert_eq!(query.include, vec!["a b c", "d", "e f"]);
    }

    #[test]
    fn parse_drops_empty_terms() {
        let query = SearchQuery::parse("- --- foo");
        assert_eq!(query.include, vec!["foo"]);
        assert!(query.exclude.is_empty());
    }

    #[test]
    fn to_fts_expression_combines_include_and_exclude() {
        let query = SearchQuery::parse("foo bar -baz -qux");
        assert_eq!(
            query.to_fts_expression().unwrap(),
            "(\"foo\" AND \"bar\") NOT (\"baz\" OR \"qux\")"
        );
    }

    #[test]
    fn to_fts_expression_without_exclusions_omits_not_clause() {
        let query = SearchQuery::parse("foo bar");
        assert_eq!(query.to_fts_expression().unwrap(), "(\"foo\" AND \"bar\")");
    }

    #[test]
    fn to_fts_expression_none_without_positive_terms() {
        let query = SearchQuery::parse("-baz");
        assert!(query.to_fts_expression().is_none());
    }
}
