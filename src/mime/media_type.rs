//! Content-Type values (RFC 2045, section 5.1).

use std::collections::BTreeMap;
use std::fmt;

use crate::Error;
use crate::Result;

/// A parsed media type, e.g., `multipart/signed; micalg=pgp-sha256`.
///
/// The type, subtype and parameter names are lowercased.  Parameter
/// values are kept as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: BTreeMap<String, String>,
}

impl MediaType {
    /// Returns a media type without parameters.
    pub fn new<S: AsRef<str>>(essence: S) -> Self {
        MediaType {
            essence: essence.as_ref().to_ascii_lowercase(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter.
    pub fn with_param<N, V>(mut self, name: N, value: V) -> Self
        where N: AsRef<str>, V: Into<String>
    {
        self.params.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Parses a Content-Type field value.
    ///
    /// Quoted values are unquoted and RFC 2231 continuations are
    /// joined.  The value must at least name a `type/subtype`.
    pub fn parse(value: &str) -> Result<Self> {
        let parsed = mailparse::parse_content_type(value);

        let essence = parsed.mimetype.trim();
        match essence.split_once('/') {
            Some((t, s)) if is_token(t) && is_token(s) => (),
            _ => return Err(Error::BadContentType(value.into())),
        }

        Ok(MediaType {
            essence: essence.to_ascii_lowercase(),
            params: parsed.params.into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
        })
    }

    /// Returns the lowercased `type/subtype`.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Returns whether this is the media type `essence`.
    pub fn is(&self, essence: &str) -> bool {
        self.essence.eq_ignore_ascii_case(essence)
    }

    /// Returns the value of the parameter `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(&name.to_ascii_lowercase()).map(|v| &v[..])
    }

    /// Returns whether the parameter `name` equals `value`, ignoring
    /// case.
    pub fn param_is(&self, name: &str, value: &str) -> bool {
        self.param(name).map(|v| v.eq_ignore_ascii_case(value)).unwrap_or(false)
    }
}

impl fmt::Display for MediaType {
    // Parameters are written in sorted order.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.essence)?;
        for (name, value) in self.params.iter() {
            write!(f, "; {}=", name)?;
            if is_token(value) {
                f.write_str(value)?;
            } else {
                f.write_str("\"")?;
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")?;
            }
        }
        Ok(())
    }
}

// RFC 2045: token := 1*<any (US-ASCII) CHAR except SPACE, CTLs,
// or tspecials>
fn is_token(s: &str) -> bool {
    ! s.is_empty()
        && s.bytes().all(|b| {
            b > b' ' && b < 0x7f && ! b"()<>@,;:\\\"/[]?=".contains(&b)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let mt = MediaType::parse(
            "Multipart/Signed; boundary=foo;\
             micalg=pgp-sha256; protocol=\"application/pgp-signature\"")
            .unwrap();
        assert_eq!(mt.essence(), "multipart/signed");
        assert!(mt.is("multipart/signed"));
        assert_eq!(mt.param("boundary"), Some("foo"));
        assert_eq!(mt.param("MICALG"), Some("pgp-sha256"));
        assert!(mt.param_is("protocol", "Application/PGP-Signature"));
        assert_eq!(mt.param("charset"), None);
    }

    #[test]
    fn parse_param_names() {
        let mt = MediaType::parse(
            "text/plain; Charset=utf-8; NAME=\"x.txt\"").unwrap();
        assert_eq!(mt.param("charset"), Some("utf-8"));
        assert_eq!(mt.param("name"), Some("x.txt"));
    }

    #[test]
    fn parse_malformed() {
        for bad in ["", "text", "text/", "/plain", "text/pl ain", "a/b/c"] {
            assert!(matches!(MediaType::parse(bad),
                             Err(Error::BadContentType(_))),
                    "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn format() {
        let mt = MediaType::new("multipart/encrypted")
            .with_param("protocol", "application/pgp-encrypted")
            .with_param("boundary", "foo");
        assert_eq!(mt.to_string(),
                   "multipart/encrypted; boundary=foo; \
                    protocol=\"application/pgp-encrypted\"");
        assert_eq!(MediaType::parse(&mt.to_string()).unwrap(), mt);

        let mt = MediaType::new("text/plain").with_param("name", "a \"b\"");
        assert_eq!(mt.to_string(), r#"text/plain; name="a \"b\"""#);
    }
}
