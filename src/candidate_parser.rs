use crate::model::{Candidate, CandidateParams, TransportParams};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use percent_encoding::percent_decode_str;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use url::Url;

const SUPPORTED_SCHEMES: &[&str] = &["vless", "vmess", "trojan"];

fn candidate_key(raw: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(raw.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Parses one URI into a [`Candidate`]. Never panics or errors loudly: an
/// unsupported scheme or malformed payload simply yields `None`, matching
/// the expectation that discovery feeds are noisy and mostly garbage.
pub fn parse_candidate(raw: &str) -> Option<Candidate> {
    let scheme = raw.split_once("://")?.0.to_lowercase();
    if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
        return None;
    }

    if scheme == "vmess" {
        parse_vmess_candidate(raw)
    } else {
        parse_url_candidate(raw, &scheme)
    }
}

fn query_map(url: &Url) -> HashMap<String, String> {
    url.query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_url_candidate(raw: &str, scheme: &str) -> Option<Candidate> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port()?;
    if port == 0 {
        return None;
    }

    let q = query_map(&url);
    let get = |name: &str| -> String { q.get(name).cloned().unwrap_or_default() };

    let transport = TransportParams {
        network: get_or("type", &q, "tcp").to_lowercase(),
        security: get_or("security", &q, "none").to_lowercase(),
        sni: get("sni"),
        host_header: get("host"),
        path: get("path"),
        service_name: if !get("serviceName").is_empty() {
            get("serviceName")
        } else {
            get("service_name")
        },
        mode: get("mode"),
        fingerprint: get("fp"),
        pbk: get("pbk"),
        sid: get("sid"),
        spx: if !get("spx").is_empty() {
            get("spx")
        } else {
            get("spiderX")
        },
        alpn: get("alpn"),
    };

    let username = percent_decode_str(url.username())
        .decode_utf8()
        .ok()?
        .to_string();

    let params = match scheme {
        "vless" => {
            if username.is_empty() {
                return None;
            }
            CandidateParams::Vless {
                encryption: if !get("encryption").is_empty() {
                    get("encryption")
                } else {
                    "none".to_string()
                },
                flow: get("flow"),
                id: username,
                transport,
            }
        }
        "trojan" => {
            if username.is_empty() {
                return None;
            }
            CandidateParams::Trojan {
                password: username,
                transport,
            }
        }
        _ => return None,
    };

    Some(Candidate {
        key: candidate_key(raw),
        raw: raw.to_string(),
        scheme: scheme.to_string(),
        host: host.clone(),
        port,
        endpoint_key: format!("{}:{}", host.to_lowercase(), port),
        params,
    })
}

fn get_or(name: &str, q: &HashMap<String, String>, default: &str) -> String {
    q.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn parse_vmess_candidate(raw: &str) -> Option<Candidate> {
    let payload = raw.strip_prefix("vmess://")?;
    let payload = payload.split('#').next().unwrap_or("").trim();
    if payload.is_empty() {
        return None;
    }

    let padding = (4 - payload.len() % 4) % 4;
    let padded = format!("{payload}{}", "=".repeat(padding));
    let decoded = URL_SAFE_NO_PAD
        .decode(padded.trim_end_matches('='))
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(&padded))
        .ok()?;
    let text = String::from_utf8_lossy(&decoded);
    let config: Value = serde_json::from_str(&text).ok()?;

    let host = config
        .get("add")
        .or_else(|| config.get("host"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let id = config
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    if host.is_empty() || id.is_empty() {
        return None;
    }

    let port: u16 = match config.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok())?,
        Some(Value::String(s)) => s.parse().ok()?,
        _ => return None,
    };
    if port == 0 {
        return None;
    }

    let str_field = |name: &str| -> String {
        config
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let aid = match config.get("aid") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };

    let network = {
        let v = str_field("net");
        if !v.is_empty() {
            v
        } else {
            let t = str_field("type");
            if t.is_empty() { "tcp".to_string() } else { t }
        }
    }
    .to_lowercase();

    let security = {
        let v = str_field("tls");
        if !v.is_empty() {
            v
        } else {
            let s = str_field("security");
            if s.is_empty() { "none".to_string() } else { s }
        }
    }
    .to_lowercase();

    let spx = {
        let v = str_field("spx");
        if !v.is_empty() { v } else { str_field("spiderX") }
    };

    let transport = TransportParams {
        network,
        security,
        sni: str_field("sni"),
        host_header: str_field("host"),
        path: str_field("path"),
        service_name: str_field("serviceName"),
        mode: str_field("mode"),
        fingerprint: str_field("fp"),
        pbk: str_field("pbk"),
        sid: str_field("sid"),
        spx,
        alpn: str_field("alpn"),
    };

    let user_security = {
        let v = str_field("scy");
        if v.is_empty() { "auto".to_string() } else { v }
    };

    Some(Candidate {
        key: candidate_key(raw),
        raw: raw.to_string(),
        scheme: "vmess".to_string(),
        host: host.clone(),
        port,
        endpoint_key: format!("{}:{}", host.to_lowercase(), port),
        params: CandidateParams::Vmess {
            transport,
            id,
            aid,
            user_security,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_vless() {
        let url = "vless://user-id@example.com:443?type=tcp&security=none";
        let c = parse_candidate(url).unwrap();
        assert_eq!(c.scheme, "vless");
        assert_eq!(c.host, "example.com");
        assert_eq!(c.port, 443);
        assert_eq!(c.endpoint_key, "example.com:443");
        match c.params {
            CandidateParams::Vless { id, transport, .. } => {
                assert_eq!(id, "user-id");
                assert_eq!(transport.network, "tcp");
                assert_eq!(transport.security, "none");
            }
            _ => panic!("expected vless"),
        }
    }

    #[test]
    fn parses_reality_vless_with_all_extras() {
        let url = "vless://uuid@server.domain.com:443?security=reality&sni=server.domain.com&fp=chrome&pbk=public_key&sid=123&spx=/&type=tcp&flow=xtls-rprx-vision&encryption=none#test";
        let c = parse_candidate(url).unwrap();
        match c.params {
            CandidateParams::Vless {
                transport, flow, ..
            } => {
                assert_eq!(transport.security, "reality");
                assert_eq!(transport.sni, "server.domain.com");
                assert_eq!(transport.pbk, "public_key");
                assert_eq!(transport.sid, "123");
                assert_eq!(transport.fingerprint, "chrome");
                assert_eq!(flow, "xtls-rprx-vision");
            }
            _ => panic!("expected vless"),
        }
    }

    #[test]
    fn parses_trojan_with_ws_tls() {
        let url = "trojan://pw@srv.example.com:8443?security=tls&sni=example.com&type=ws&path=%2Fp&host=h.example.com";
        let c = parse_candidate(url).unwrap();
        assert_eq!(c.scheme, "trojan");
        match c.params {
            CandidateParams::Trojan {
                password,
                transport,
            } => {
                assert_eq!(password, "pw");
                assert_eq!(transport.network, "ws");
                assert_eq!(transport.path, "/p");
                assert_eq!(transport.host_header, "h.example.com");
            }
            _ => panic!("expected trojan"),
        }
    }

    #[test]
    fn parses_vmess_base64_json_payload() {
        let json = r#"{"add":"1.2.3.4","port":"443","id":"11111111-2222-3333-4444-555555555555","net":"tcp"}"#;
        let payload = URL_SAFE_NO_PAD.encode(json.as_bytes());
        let url = format!("vmess://{payload}");
        let c = parse_candidate(&url).unwrap();
        assert_eq!(c.scheme, "vmess");
        assert_eq!(c.host, "1.2.3.4");
        assert_eq!(c.port, 443);
        match c.params {
            CandidateParams::Vmess { id, transport, .. } => {
                assert_eq!(id, "11111111-2222-3333-4444-555555555555");
                assert_eq!(transport.network, "tcp");
            }
            _ => panic!("expected vmess"),
        }
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(parse_candidate("ss://aes-128-gcm:secret@example.com:8388").is_none());
        assert!(parse_candidate("socks5://localhost:1080").is_none());
    }

    #[test]
    fn rejects_missing_credential_or_host() {
        assert!(parse_candidate("vless://@example.com:443").is_none());
        assert!(parse_candidate("trojan://pw@:443").is_none());
    }

    #[test]
    fn same_raw_uri_always_yields_same_key() {
        let url = "vless://user-id@example.com:443?type=tcp&security=none";
        let a = parse_candidate(url).unwrap();
        let b = parse_candidate(url).unwrap();
        assert_eq!(a.key, b.key);
    }
}
