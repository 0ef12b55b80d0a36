use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// The stable, URL-safe identifier of a movie or category.
///
/// Slugs only contain ASCII letters, digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("`{text}` is not a valid slug, only letters, digits, `_` and `-` are allowed"))]
pub struct InvalidSlug {
    pub text: String,
}

impl Slug {
    /// Derive a slug from a human readable title: lower-case it, collapse whitespace runs into a
    /// single `-` and drop every other character that is not allowed in a slug.
    pub fn derive(title: &str) -> Result<Slug, InvalidSlug> {
        let mut slug = String::with_capacity(title.len());
        let mut in_whitespace = false;

        for c in title.chars() {
            if c.is_whitespace() {
                if !in_whitespace {
                    slug.push('-');
                }
                in_whitespace = true;
                continue;
            }

            in_whitespace = false;
            if is_slug_char(c) {
                slug.push(c.to_ascii_lowercase());
            }
        }

        if slug.is_empty() {
            return InvalidSlugSnafu { text: title }.fail();
        }

        Ok(Slug(slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl FromStr for Slug {
    type Err = InvalidSlug;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() || !input.chars().all(is_slug_char) {
            return InvalidSlugSnafu { text: input }.fail();
        }

        Ok(Slug(input.to_string()))
    }
}

impl TryFrom<String> for Slug {
    type Error = InvalidSlug;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
