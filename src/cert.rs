//! Certificate discovery convention for secure endpoints (`§6`).
//!
//! TLS handshake internals are out of scope (`§1`); this module only
//! implements the file-lookup convention an `EndpointRegistry` uses
//! when binding a secure endpoint without an explicitly supplied
//! certificate. The actual certificate/key types are left to whatever
//! TLS crate the host wires in, so this module works in terms of
//! paths rather than parsed certificates.

use std::path::{Path, PathBuf};

/// Resolved `.cer`/`.key` pair for one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Look for `<cert_folder>/<port>.cer` and `<cert_folder>/<port>.key`.
/// Returns `Some` only if *both* files exist, per `§6`.
pub fn discover(cert_folder: &Path, port: u16) -> Option<CertPaths> {
    let cert = cert_folder.join(format!("{}.cer", port));
    let key = cert_folder.join(format!("{}.key", port));
    if cert.is_file() && key.is_file() {
        Some(CertPaths { cert: cert, key: key })
    } else {
        None
    }
}

/// Resolve the certificate to bind a secure endpoint with: an
/// explicit override wins, then per-port discovery in `cert_folder`,
/// then a shared default. `None` means the bind must fail.
pub fn resolve<'a>(
    explicit: Option<&'a CertPaths>,
    cert_folder: Option<&Path>,
    port: u16,
    default: Option<&'a CertPaths>,
) -> Option<CertPaths> {
    if let Some(c) = explicit {
        return Some(c.clone());
    }
    if let Some(folder) = cert_folder {
        if let Some(found) = discover(folder, port) {
            return Some(found);
        }
    }
    default.cloned()
}

#[cfg(test)]
mod test {
    use super::{discover, resolve, CertPaths};
    use std::fs;
    use std::path::PathBuf;

    fn tmp_dir(name: &str) -> PathBuf {
        let mut dir = ::std::env::temp_dir();
        dir.push(format!("vhost-http-core-cert-test-{}", name));
        let _ = fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn discovers_matching_pair() {
        let dir = tmp_dir("discovers_matching_pair");
        fs::write(dir.join("8443.cer"), b"cert").unwrap();
        fs::write(dir.join("8443.key"), b"key").unwrap();
        let found = discover(&dir, 8443).unwrap();
        assert_eq!(found.cert, dir.join("8443.cer"));
        assert_eq!(found.key, dir.join("8443.key"));
    }

    #[test]
    fn missing_key_means_no_discovery() {
        let dir = tmp_dir("missing_key_means_no_discovery");
        fs::write(dir.join("9443.cer"), b"cert").unwrap();
        assert!(discover(&dir, 9443).is_none());
    }

    #[test]
    fn resolve_prefers_explicit_over_discovery() {
        let dir = tmp_dir("resolve_prefers_explicit");
        fs::write(dir.join("443.cer"), b"cert").unwrap();
        fs::write(dir.join("443.key"), b"key").unwrap();
        let explicit = CertPaths {
            cert: PathBuf::from("/explicit.cer"),
            key: PathBuf::from("/explicit.key"),
        };
        let resolved = resolve(Some(&explicit), Some(&dir), 443, None).unwrap();
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let default = CertPaths {
            cert: PathBuf::from("/default.cer"),
            key: PathBuf::from("/default.key"),
        };
        let resolved = resolve(None, None, 8080, Some(&default)).unwrap();
        assert_eq!(resolved, default);
    }

    #[test]
    fn resolve_with_nothing_available_fails_bind() {
        assert!(resolve(None, None, 8080, None).is_none());
    }
}
