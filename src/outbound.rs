use crate::error::ValidatorError;
use crate::model::{Candidate, CandidateParams, TransportParams};
use serde_json::{Value, json};

const SUPPORTED_NETWORKS: &[&str] = &["tcp", "ws", "grpc", "xhttp", "httpupgrade"];

/// Translates a [`Candidate`] into an engine-shaped outbound descriptor, or
/// refuses with the reason the candidate cannot be run (§4.3).
pub fn build_outbound(candidate: &Candidate) -> Result<Value, ValidatorError> {
    let stream_settings = build_stream_settings(candidate.host.as_str(), candidate.params.transport())?;

    let outbound = match &candidate.params {
        CandidateParams::Vless {
            id, encryption, flow, ..
        } => {
            let mut user = json!({
                "id": id,
                "encryption": if encryption.is_empty() { "none" } else { encryption.as_str() },
            });
            if !flow.is_empty() {
                user["flow"] = Value::String(flow.clone());
            }
            json!({
                "protocol": "vless",
                "settings": {
                    "vnext": [{
                        "address": candidate.host,
                        "port": candidate.port,
                        "users": [user],
                    }]
                },
                "streamSettings": stream_settings,
            })
        }
        CandidateParams::Trojan { password, .. } => json!({
            "protocol": "trojan",
            "settings": {
                "servers": [{
                    "address": candidate.host,
                    "port": candidate.port,
                    "password": password,
                }]
            },
            "streamSettings": stream_settings,
        }),
        CandidateParams::Vmess {
            id,
            aid,
            user_security,
            ..
        } => json!({
            "protocol": "vmess",
            "settings": {
                "vnext": [{
                    "address": candidate.host,
                    "port": candidate.port,
                    "users": [{
                        "id": id,
                        "alterId": aid,
                        "security": user_security,
                    }]
                }]
            },
            "streamSettings": stream_settings,
        }),
    };

    Ok(outbound)
}

fn build_stream_settings(host: &str, t: &TransportParams) -> Result<Value, ValidatorError> {
    let network = t.network.as_str();
    if !SUPPORTED_NETWORKS.contains(&network) {
        return Err(ValidatorError::UnsupportedNetwork(network.to_string()));
    }

    let mut stream = json!({ "network": network });

    match t.security.as_str() {
        "reality" => {
            if t.pbk.is_empty() {
                return Err(ValidatorError::MissingRealityKey);
            }
            if t.sni.is_empty() {
                return Err(ValidatorError::MissingRealitySni);
            }
            let mut reality = json!({ "serverName": t.sni, "publicKey": t.pbk });
            if !t.fingerprint.is_empty() {
                reality["fingerprint"] = Value::String(t.fingerprint.clone());
            }
            if !t.sid.is_empty() {
                reality["shortId"] = Value::String(t.sid.clone());
            }
            if !t.spx.is_empty() {
                reality["spiderX"] = Value::String(t.spx.clone());
            }
            stream["security"] = Value::String("reality".to_string());
            stream["realitySettings"] = reality;
        }
        "tls" | "xtls" => {
            let sni = if t.sni.is_empty() { host } else { t.sni.as_str() };
            let mut tls = json!({ "serverName": sni, "allowInsecure": false });
            if !t.fingerprint.is_empty() {
                tls["fingerprint"] = Value::String(t.fingerprint.clone());
            }
            if !t.alpn.is_empty() {
                let alpn: Vec<&str> = t.alpn.split(',').filter(|p| !p.is_empty()).collect();
                tls["alpn"] = json!(alpn);
            }
            stream["security"] = Value::String("tls".to_string());
            stream["tlsSettings"] = tls;
        }
        _ => {
            stream["security"] = Value::String("none".to_string());
        }
    }

    match network {
        "ws" => {
            let mut ws = json!({ "path": if t.path.is_empty() { "/" } else { t.path.as_str() } });
            if !t.host_header.is_empty() {
                ws["headers"] = json!({ "Host": t.host_header });
            }
            stream["wsSettings"] = ws;
        }
        "grpc" => {
            let mut grpc = json!({});
            if !t.service_name.is_empty() {
                grpc["serviceName"] = Value::String(t.service_name.clone());
            }
            if t.mode.eq_ignore_ascii_case("multi") {
                grpc["multiMode"] = Value::Bool(true);
            }
            stream["grpcSettings"] = grpc;
        }
        "xhttp" => {
            let mut xhttp = json!({});
            if !t.path.is_empty() {
                xhttp["path"] = Value::String(t.path.clone());
            }
            if !t.host_header.is_empty() {
                xhttp["host"] = Value::String(t.host_header.clone());
            }
            stream["xhttpSettings"] = xhttp;
        }
        "httpupgrade" => {
            let mut hu = json!({ "path": if t.path.is_empty() { "/" } else { t.path.as_str() } });
            if !t.host_header.is_empty() {
                hu["host"] = Value::String(t.host_header.clone());
            }
            stream["httpupgradeSettings"] = hu;
        }
        _ => {}
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate_parser::parse_candidate;

    #[test]
    fn refuses_unsupported_network() {
        let c = parse_candidate("vless://id@host:443?type=h2").unwrap();
        let err = build_outbound(&c).unwrap_err();
        assert!(matches!(err, ValidatorError::UnsupportedNetwork(_)));
    }

    #[test]
    fn refuses_reality_without_pbk() {
        let c = parse_candidate("vless://id@host:443?type=tcp&security=reality&sni=a.com").unwrap();
        let err = build_outbound(&c).unwrap_err();
        assert!(matches!(err, ValidatorError::MissingRealityKey));
    }

    #[test]
    fn builds_vless_ws_tls_outbound() {
        let c = parse_candidate(
            "vless://id@host.example.com:443?type=ws&security=tls&sni=sni.example.com&path=/p&host=h.example.com",
        )
        .unwrap();
        let outbound = build_outbound(&c).unwrap();
        assert_eq!(outbound["protocol"], "vless");
        assert_eq!(outbound["streamSettings"]["network"], "ws");
        assert_eq!(outbound["streamSettings"]["security"], "tls");
        assert_eq!(outbound["streamSettings"]["tlsSettings"]["serverName"], "sni.example.com");
        assert_eq!(outbound["streamSettings"]["wsSettings"]["path"], "/p");
    }

    #[test]
    fn builds_trojan_grpc_outbound() {
        let c = parse_candidate(
            "trojan://pw@host.example.com:443?type=grpc&security=tls&serviceName=svc&mode=multi",
        )
        .unwrap();
        let outbound = build_outbound(&c).unwrap();
        assert_eq!(outbound["protocol"], "trojan");
        assert_eq!(outbound["streamSettings"]["grpcSettings"]["serviceName"], "svc");
        assert_eq!(outbound["streamSettings"]["grpcSettings"]["multiMode"], true);
    }

    #[test]
    fn builds_reality_outbound_with_optional_fields() {
        let c = parse_candidate(
            "vless://id@host:443?type=tcp&security=reality&sni=a.com&pbk=key&sid=abc&fp=chrome",
        )
        .unwrap();
        let outbound = build_outbound(&c).unwrap();
        assert_eq!(outbound["streamSettings"]["realitySettings"]["publicKey"], "key");
        assert_eq!(outbound["streamSettings"]["realitySettings"]["shortId"], "abc");
        assert_eq!(outbound["streamSettings"]["realitySettings"]["fingerprint"], "chrome");
    }
}
