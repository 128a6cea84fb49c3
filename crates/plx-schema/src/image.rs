//! Docker image reference grammar
//!
//! `[host[:port]/]component[/component...][:tag][@digest]`
//!
//! Path components are lowercase alphanumerics separated by `.`, `_`, `__`
//! or `-`. Only the last component may carry a tag; a `:` anywhere else in
//! the path is rejected.

use std::fmt;

use crate::SchemaError;

/// Parsed image reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host, with optional port
    pub registry: Option<String>,
    /// Repository path (`library/busybox`)
    pub repository: String,
    /// Tag
    pub tag: Option<String>,
    /// Digest (`sha256:...`)
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse and validate an image reference
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::parse(raw, format!("invalid image: {}", reason));

        if raw.is_empty() || raw.trim() != raw {
            return Err(invalid("empty or padded with whitespace"));
        }

        let (name_tag, digest) = match raw.split_once('@') {
            Some((rest, digest)) => {
                validate_digest(digest).map_err(|r| invalid(&r))?;
                (rest, Some(digest.to_string()))
            }
            None => (raw, None),
        };

        let mut segments: Vec<&str> = name_tag.split('/').collect();
        let registry = if segments.len() > 1 && is_registry_host(segments[0]) {
            let host = segments.remove(0);
            validate_host(host).map_err(|r| invalid(&r))?;
            Some(host.to_string())
        } else {
            None
        };

        let last = segments.pop().ok_or_else(|| invalid("missing repository"))?;
        let (last_name, tag) = match last.split_once(':') {
            Some((name, tag)) => {
                validate_tag(tag).map_err(|r| invalid(&r))?;
                (name, Some(tag.to_string()))
            }
            None => (last, None),
        };

        for component in segments.iter().chain(std::iter::once(&last_name)) {
            validate_component(component).map_err(|r| invalid(&r))?;
        }

        let mut repository = segments.join("/");
        if !repository.is_empty() {
            repository.push('/');
        }
        repository.push_str(last_name);

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Validate an image string, returning it unchanged on success
pub fn validate_image(raw: &str) -> Result<(), SchemaError> {
    ImageRef::parse(raw).map(|_| ())
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn validate_host(host: &str) -> Result<(), String> {
    let (name, port) = match host.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(format!("bad registry host `{}`", host));
    }
    if let Some(port) = port {
        if port.is_empty() || port.parse::<u16>().is_err() {
            return Err(format!("bad registry port `{}`", port));
        }
    }
    Ok(())
}

fn validate_component(component: &str) -> Result<(), String> {
    if component.is_empty() {
        return Err("empty path component".to_string());
    }
    if component.contains(':') {
        return Err(format!("`:` not allowed in path component `{}`", component));
    }
    let bytes = component.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return Err(format!("path component `{}` must start and end with [a-z0-9]", component));
    }

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if is_alnum(b) {
            i += 1;
            continue;
        }
        let sep_len = match b {
            b'.' => 1,
            b'_' if bytes.get(i + 1) == Some(&b'_') => 2,
            b'_' => 1,
            b'-' => {
                let mut n = 0;
                while bytes.get(i + n) == Some(&b'-') {
                    n += 1;
                }
                n
            }
            _ => return Err(format!("invalid character in path component `{}`", component)),
        };
        i += sep_len;
        if !bytes.get(i).copied().map(is_alnum).unwrap_or(false) {
            return Err(format!("bad separator in path component `{}`", component));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    let mut chars = tag.chars();
    let valid_first = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric() || c == '_')
        .unwrap_or(false);
    if !valid_first
        || tag.len() > 128
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(format!("bad tag `{}`", tag));
    }
    Ok(())
}

fn validate_digest(digest: &str) -> Result<(), String> {
    match digest.split_once(':') {
        Some((algo, hex))
            if !algo.is_empty()
                && hex.len() >= 32
                && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(())
        }
        _ => Err(format!("bad digest `{}`", digest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bare("busybox", None, "busybox", None)]
    #[case::tagged("python:3.11-slim", None, "python", Some("3.11-slim"))]
    #[case::org("polyaxon/polyaxon-init:v2", None, "polyaxon/polyaxon-init", Some("v2"))]
    #[case::registry("gcr.io/proj/img", Some("gcr.io"), "proj/img", None)]
    #[case::registry_port("localhost:5000/img:1", Some("localhost:5000"), "img", Some("1"))]
    #[case::separators("my-org/my__image.x", None, "my-org/my__image.x", None)]
    fn accepts_valid_references(
        #[case] raw: &str,
        #[case] registry: Option<&str>,
        #[case] repository: &str,
        #[case] tag: Option<&str>,
    ) {
        let image = ImageRef::parse(raw).unwrap();
        assert_eq!(image.registry.as_deref(), registry);
        assert_eq!(image.repository, repository);
        assert_eq!(image.tag.as_deref(), tag);
        assert_eq!(image.to_string(), raw);
    }

    #[rstest]
    #[case::empty("")]
    #[case::two_tags("img:1:2")]
    #[case::colon_in_path("org:x/img")]
    #[case::uppercase("Busybox")]
    #[case::bad_port("host:port/img")]
    #[case::trailing_separator("img-")]
    #[case::whitespace("busy box")]
    fn rejects_invalid_references(#[case] raw: &str) {
        assert!(ImageRef::parse(raw).is_err(), "{} should be rejected", raw);
    }

    #[test]
    fn accepts_digest() {
        let raw = format!("busybox@sha256:{}", "a".repeat(64));
        let image = ImageRef::parse(&raw).unwrap();
        assert!(image.digest.is_some());
    }
}
