//! Detection of a WebSocket upgrade request (`§1` Non-goals: frame
//! coding, masking, and the `Sec-WebSocket-Accept` SHA-1 computation are
//! explicitly out of scope — this module only recognizes the handshake
//! so `Connection` can hand the socket off, per `§4.6`).
//!
//! Grounded on the teacher's `server::websocket::get_handshake`, which
//! parsed the same header set but went on to compute the SHA-1 accept
//! value; that computation, and the `sha1`/`byteorder`/`rand`
//! dependencies it needed, are dropped here (`SPEC_FULL.md`).

use header_set::HeaderSet;
use version::Version;

/// The handshake fields a host-code WebSocket layer needs once this
/// crate hands the connection off.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub key: String,
    pub version: String,
    pub protocols: Vec<String>,
    pub extensions: Vec<String>,
}

/// Not upgrade-eligible: not a malformed request, just not this.
#[derive(Debug)]
pub struct NotAnUpgrade;

/// Recognize a WebSocket upgrade per RFC 6455 §4.1: `GET`, HTTP/1.1,
/// `Upgrade: websocket`, `Connection` containing an `Upgrade` token, and
/// a present `Sec-WebSocket-Key`/`Sec-WebSocket-Version`.
///
/// Returns `Ok(None)` for an ordinary request (no `Upgrade` header at
/// all) and `Err(NotAnUpgrade)` when an `Upgrade` header is present but
/// the rest of the handshake is malformed — the caller treats that as a
/// parse error rather than silently falling through to a plain request.
pub fn detect(method: &str, version: Version, headers: &HeaderSet)
    -> Result<Option<UpgradeRequest>, NotAnUpgrade>
{
    let upgrade = match headers.value_str("upgrade") {
        Some(v) => v,
        None => return Ok(None),
    };
    if !has_token(upgrade, "websocket") {
        return Ok(None);
    }
    if method != "GET" || version != Version::Http11 {
        debug!("websocket upgrade attempted with method {:?} / {}", method, version);
        return Err(NotAnUpgrade);
    }
    if !headers.value_str("connection")
        .map(|v| has_token(v, "upgrade"))
        .unwrap_or(false)
    {
        debug!("no Connection: Upgrade token on a websocket upgrade request");
        return Err(NotAnUpgrade);
    }
    let key = headers.value_str("sec-websocket-key")
        .ok_or(NotAnUpgrade).map_err(|e| { debug!("missing Sec-WebSocket-Key"); e })?
        .to_string();
    let ws_version = headers.value_str("sec-websocket-version")
        .ok_or(NotAnUpgrade).map_err(|e| { debug!("missing Sec-WebSocket-Version"); e })?
        .to_string();

    let protocols = comma_list(headers.value_str("sec-websocket-protocol"));
    let extensions = comma_list(headers.value_str("sec-websocket-extensions"));

    Ok(Some(UpgradeRequest {
        key: key,
        version: ws_version,
        protocols: protocols,
        extensions: extensions,
    }))
}

fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn comma_list(value: Option<&str>) -> Vec<String> {
    match value {
        Some(v) => v.split(',').map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::detect;
    use header_set::{HeaderSet, Side};
    use version::Version;

    fn headers(pairs: &[(&str, &str)]) -> HeaderSet {
        let mut h = HeaderSet::new();
        for &(name, value) in pairs {
            h.add(Side::Request, name, value.as_bytes().to_vec()).unwrap();
        }
        h
    }

    #[test]
    fn plain_request_is_not_an_upgrade() {
        let h = headers(&[("Host", "x")]);
        assert!(detect("GET", Version::Http11, &h).unwrap().is_none());
    }

    #[test]
    fn full_handshake_is_recognized() {
        let h = headers(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
            ("Sec-WebSocket-Protocol", "chat, superchat"),
        ]);
        let req = detect("GET", Version::Http11, &h).unwrap().unwrap();
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(req.version, "13");
        assert_eq!(req.protocols, vec!["chat", "superchat"]);
    }

    #[test]
    fn wrong_method_is_rejected() {
        let h = headers(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", "x"),
            ("Sec-WebSocket-Version", "13"),
        ]);
        assert!(detect("POST", Version::Http11, &h).is_err());
    }

    #[test]
    fn missing_connection_upgrade_token_is_rejected() {
        let h = headers(&[
            ("Upgrade", "websocket"),
            ("Connection", "keep-alive"),
            ("Sec-WebSocket-Key", "x"),
            ("Sec-WebSocket-Version", "13"),
        ]);
        assert!(detect("GET", Version::Http11, &h).is_err());
    }

    #[test]
    fn non_websocket_upgrade_token_is_ignored() {
        let h = headers(&[("Upgrade", "h2c")]);
        assert!(detect("GET", Version::Http11, &h).unwrap().is_none());
    }
}
