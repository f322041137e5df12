use std::fmt;

use error::Error;

/// The scheme half of a `PrefixSpec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn parse(s: &str) -> Option<Scheme> {
        if s.eq_ignore_ascii_case("http") {
            Some(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Some(Scheme::Https)
        } else {
            None
        }
    }
}

/// The host half of a `PrefixSpec` (`§3`: `*` is the unhandled-fallback
/// wildcard, `+` is the catch-all).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Specific(String),
    /// `*` — unhandled by any specific host.
    Star,
    /// `+` — matches any host.
    Plus,
}

impl Host {
    fn parse(s: &str) -> Option<Host> {
        if s.is_empty() {
            None
        } else if s == "*" {
            Some(Host::Star)
        } else if s == "+" {
            Some(Host::Plus)
        } else {
            Some(Host::Specific(s.to_ascii_lowercase()))
        }
    }
}

/// A parsed `scheme://host:port/path/` prefix literal (`§3`, `§4.1`).
///
/// Two `PrefixSpec`s are equal iff `(scheme, host, port, path)` are equal
/// after case-folding the host — `Host::parse` already lower-cases
/// `Specific` hosts, so the derived `PartialEq`/`Hash`/`Ord` below are
/// correct as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefixSpec {
    pub scheme: Scheme,
    pub host: Host,
    pub port: u16,
    pub path: String,
}

impl PrefixSpec {
    /// Parse a literal such as `http://+:80/api/` or `https://example.com/`.
    ///
    /// Fails with `InvalidPrefix` carrying one of the three reasons named
    /// in `§4.1`: *invalid host*, *invalid port*, *invalid path*.
    pub fn parse(literal: &str) -> Result<PrefixSpec, Error> {
        let (scheme_str, rest) = literal.split_once("://")
            .ok_or(Error::InvalidPrefix("invalid host"))?;
        let scheme = Scheme::parse(scheme_str)
            .ok_or(Error::InvalidPrefix("invalid host"))?;

        let slash = rest.find('/')
            .ok_or(Error::InvalidPrefix("invalid path"))?;
        let (authority, path) = rest.split_at(slash);

        let (host_str, port) = match authority.rfind(':') {
            Some(idx) => {
                let (h, p) = authority.split_at(idx);
                let p = &p[1..];
                let port: u32 = p.parse()
                    .map_err(|_| Error::InvalidPrefix("invalid port"))?;
                if port == 0 || port > 65535 {
                    return Err(Error::InvalidPrefix("invalid port"));
                }
                (h, port as u16)
            }
            None => {
                let default_port = match scheme {
                    Scheme::Http => 80,
                    Scheme::Https => 443,
                };
                (authority, default_port)
            }
        };
        let host = Host::parse(host_str)
            .ok_or(Error::InvalidPrefix("invalid host"))?;

        validate_path(path)?;

        Ok(PrefixSpec {
            scheme: scheme,
            host: host,
            port: port,
            path: path.to_string(),
        })
    }

    /// The registered path is the longest prefix of either `path` or
    /// `path + '/'` — implements the matching rule of `§4.7`.
    pub fn matches_path(&self, request_path: &str) -> bool {
        if request_path.starts_with(self.path.as_str()) {
            return true;
        }
        // A request path lacking its trailing slash still matches a
        // registered prefix that expects one, per `§4.7`/P4.
        let mut padded = String::with_capacity(request_path.len() + 1);
        padded.push_str(request_path);
        padded.push('/');
        padded.starts_with(self.path.as_str())
    }
}

fn validate_path(path: &str) -> Result<(), Error> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPrefix("invalid path"));
    }
    if !path.ends_with('/') {
        return Err(Error::InvalidPrefix("invalid path"));
    }
    if path.contains('%') {
        return Err(Error::InvalidPrefix("invalid path"));
    }
    if path.contains("//") {
        return Err(Error::InvalidPrefix("invalid path"));
    }
    Ok(())
}

impl fmt::Display for PrefixSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        let host = match self.host {
            Host::Specific(ref h) => h.as_str(),
            Host::Star => "*",
            Host::Plus => "+",
        };
        write!(f, "{}://{}:{}{}", scheme, host, self.port, self.path)
    }
}

#[cfg(test)]
mod test {
    use super::{PrefixSpec, Host, Scheme};

    #[test]
    fn parses_plus_host() {
        let p = PrefixSpec::parse("http://+:80/api/").unwrap();
        assert_eq!(p.scheme, Scheme::Http);
        assert_eq!(p.host, Host::Plus);
        assert_eq!(p.port, 80);
        assert_eq!(p.path, "/api/");
    }

    #[test]
    fn parses_star_host_default_port() {
        let p = PrefixSpec::parse("https://*/").unwrap();
        assert_eq!(p.host, Host::Star);
        assert_eq!(p.port, 443);
    }

    #[test]
    fn case_folds_specific_host() {
        let p = PrefixSpec::parse("http://Example.COM:8080/a/").unwrap();
        assert_eq!(p.host, Host::Specific("example.com".into()));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(PrefixSpec::parse("+:80/api/").is_err());
    }

    #[test]
    fn rejects_bad_port() {
        assert!(PrefixSpec::parse("http://+:0/api/").is_err());
        assert!(PrefixSpec::parse("http://+:99999/api/").is_err());
        assert!(PrefixSpec::parse("http://+:abc/api/").is_err());
    }

    #[test]
    fn rejects_path_without_leading_slash() {
        assert!(PrefixSpec::parse("http://+:80/api/").is_ok());
        assert!(PrefixSpec::parse("http://+:80api/").is_err());
    }

    #[test]
    fn rejects_path_without_trailing_slash() {
        assert!(PrefixSpec::parse("http://+:80/api").is_err());
    }

    #[test]
    fn rejects_percent_and_double_slash() {
        assert!(PrefixSpec::parse("http://+:80/a%2f/").is_err());
        assert!(PrefixSpec::parse("http://+:80/a//b/").is_err());
    }

    #[test]
    fn matches_longest_prefix_with_or_without_trailing_slash() {
        let p = PrefixSpec::parse("http://+:80/api/").unwrap();
        assert!(p.matches_path("/api/v1/"));
        assert!(p.matches_path("/api/"));
        assert!(p.matches_path("/api"));
        assert!(!p.matches_path("/other/"));
    }

    #[test]
    fn equality_ignores_host_case() {
        let a = PrefixSpec::parse("http://Example.com/a/").unwrap();
        let b = PrefixSpec::parse("http://example.COM/a/").unwrap();
        assert_eq!(a, b);
    }
}
