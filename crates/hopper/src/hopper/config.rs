use std::{fmt, fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::hopper::net;

pub const DEFAULT_ROUTE_NAME: &str = "default";
pub const DEFAULT_GAME_PORT: u16 = 25565;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_SRV_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// May carry the entire configuration body inline as a YAML document,
/// overriding the file path.
const CONFIG_ENV_VAR: &str = "HOPPER_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// Splice the client to the route's target.
    Forward,
    /// Close the client, optionally with a disconnect message.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleVersion {
    Disabled,
    V1,
    V2,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    /// Operator-supplied address strings; entries with a port take priority
    /// over host-only entries at lookup time.
    pub matches: Vec<String>,
    pub action: RouteAction,
    /// Destination address; a missing port triggers the SRV fallback.
    pub target: String,
    /// `host:port` written into the handshake before forwarding.
    pub mimic: Option<String>,
    pub connect_timeout: Duration,
    pub preamble_version: PreambleVersion,
    /// Precomputed JSON payloads for the disconnect packet.
    pub dial_fail_message_json: Option<String>,
    pub reject_message_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub debug: bool,
    pub routes: Vec<Route>,
    pub default_connect_timeout: Duration,
    pub srv_lookup_timeout: Duration,
    /// Inbound: clients must send a PROXY header, stripped by the accept
    /// wrapper before the handshake codec sees bytes.
    pub proxy_protocol: bool,
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigSource {
    File,
    Env,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Env => write!(f, "env:{CONFIG_ENV_VAR}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    listen: String,

    #[serde(default)]
    debug: bool,

    #[serde(default)]
    routes: Vec<FileRoute>,

    default_connect_timeout: Option<String>,
    srv_lookup_timeout: Option<String>,

    #[serde(default)]
    proxy_protocol: bool,
}

#[derive(Debug, Deserialize)]
struct FileRoute {
    name: String,

    #[serde(default)]
    matches: Vec<String>,

    action: Option<String>,

    target: Option<String>,
    mimic: Option<String>,
    connect_timeout: Option<String>,
    dial_fail_message: Option<String>,

    #[serde(default)]
    preamble_version: u8,

    reject_message: Option<String>,
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let (body, source) = match inline_config_body() {
        Some(body) => (body, ConfigSource::Env),
        None => (
            fs::read_to_string(path)
                .with_context(|| format!("config: read {}", path.display()))?,
            ConfigSource::File,
        ),
    };

    let fc: FileConfig = serde_yaml::from_str(&body).context("config: parse yaml")?;
    Config::from_file_config(fc, source)
}

fn inline_config_body() -> Option<String> {
    std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|s| !s.trim().is_empty())
}

impl Config {
    fn from_file_config(fc: FileConfig, source: ConfigSource) -> anyhow::Result<Config> {
        let listen = fc.listen.trim().to_string();
        validate_address(
            "listen",
            net::normalize_bind_addr(&listen).as_ref(),
            true,
        )?;

        let default_connect_timeout = parse_duration_field(
            "default_connect_timeout",
            fc.default_connect_timeout.as_deref(),
            DEFAULT_CONNECT_TIMEOUT,
        )?;
        let srv_lookup_timeout = parse_duration_field(
            "srv_lookup_timeout",
            fc.srv_lookup_timeout.as_deref(),
            DEFAULT_SRV_LOOKUP_TIMEOUT,
        )?;

        let mut routes = Vec::with_capacity(fc.routes.len());
        for (i, fr) in fc.routes.iter().enumerate() {
            routes.push(Route::from_file_route(i, fr, default_connect_timeout)?);
        }

        Ok(Config {
            listen,
            debug: fc.debug,
            routes,
            default_connect_timeout,
            srv_lookup_timeout,
            proxy_protocol: fc.proxy_protocol,
            source,
        })
    }
}

impl Route {
    fn from_file_route(
        i: usize,
        fr: &FileRoute,
        default_connect_timeout: Duration,
    ) -> anyhow::Result<Route> {
        let name = fr.name.trim().to_string();
        if name.is_empty() {
            anyhow::bail!("config: routes[{i}] is missing a name");
        }

        let action = match fr.action.as_deref().map(str::trim).unwrap_or("") {
            "" | "forward" => RouteAction::Forward,
            "reject" => RouteAction::Reject,
            other => anyhow::bail!("config: routes[{i}] has unknown action {other:?}"),
        };

        let matches: Vec<String> = fr
            .matches
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        for (j, m) in matches.iter().enumerate() {
            validate_address(&format!("routes[{i}].matches[{j}]"), m, false)?;
        }

        let target = fr
            .target
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        if action == RouteAction::Forward {
            if target.is_empty() {
                anyhow::bail!("config: routes[{i}] does not specify the target");
            }
            validate_address(&format!("routes[{i}].target"), &target, false)?;
        }

        let mimic = fr
            .mimic
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        if let Some(m) = &mimic {
            validate_address(&format!("routes[{i}].mimic"), m, true)?;
        }

        let connect_timeout = parse_duration_field(
            &format!("routes[{i}].connect_timeout"),
            fr.connect_timeout.as_deref(),
            default_connect_timeout,
        )?;

        let preamble_version = match fr.preamble_version {
            0 => PreambleVersion::Disabled,
            1 => PreambleVersion::V1,
            2 => PreambleVersion::V2,
            v => anyhow::bail!(
                "config: routes[{i}] declares invalid preamble version {v}, should be 1 or 2"
            ),
        };

        Ok(Route {
            name,
            matches,
            action,
            target,
            mimic,
            connect_timeout,
            preamble_version,
            dial_fail_message_json: prepared_message_json(fr.dial_fail_message.as_deref()),
            reject_message_json: prepared_message_json(fr.reject_message.as_deref()),
        })
    }
}

fn validate_address(what: &str, address: &str, must_have_port: bool) -> anyhow::Result<()> {
    if address.is_empty() {
        anyhow::bail!("config: field {what} is empty");
    }
    if net::split_host_port(address).is_some() {
        return Ok(());
    }
    if must_have_port {
        anyhow::bail!("config: field {what} with value {address:?} must carry a valid port");
    }
    if address.contains(':') {
        anyhow::bail!("config: field {what} with value {address:?} is not a valid address");
    }
    Ok(())
}

fn parse_duration_field(
    what: &str,
    value: Option<&str>,
    default: Duration,
) -> anyhow::Result<Duration> {
    let Some(s) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    let d = humantime::parse_duration(s)
        .with_context(|| format!("config: field {what} with value {s:?} is not a duration"))?;
    if d.is_zero() {
        anyhow::bail!("config: field {what} must be positive");
    }
    Ok(d)
}

/// Disconnect payloads go on the wire as JSON text. A value that already
/// parses as JSON is kept verbatim; anything else becomes a JSON string
/// literal. Computed once here so the connection path never re-encodes.
fn prepared_message_json(msg: Option<&str>) -> Option<String> {
    let msg = msg.filter(|s| !s.is_empty())?;
    if serde_json::from_str::<serde_json::Value>(msg).is_ok() {
        Some(msg.to_string())
    } else {
        Some(serde_json::Value::String(msg.to_string()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> anyhow::Result<Config> {
        let fc: FileConfig = serde_yaml::from_str(yaml)?;
        Config::from_file_config(fc, ConfigSource::File)
    }

    #[test]
    fn full_config_parses_with_defaults() {
        let cfg = parse(
            r#"
listen: ":25565"
routes:
  - name: hub
    matches: ["mc.example.com", "play.example.com:25565"]
    target: "10.0.0.2:25565"
    mimic: "real.host:20001"
    connect_timeout: 5s
    preamble_version: 2
  - name: closed
    matches: ["old.example.com"]
    action: reject
    reject_message: "server moved"
  - name: default
    target: "fallback"
"#,
        )
        .unwrap();

        assert_eq!(cfg.listen, ":25565");
        assert!(!cfg.debug);
        assert!(!cfg.proxy_protocol);
        assert_eq!(cfg.default_connect_timeout, Duration::from_secs(3));
        assert_eq!(cfg.srv_lookup_timeout, Duration::from_secs(3));
        assert_eq!(cfg.routes.len(), 3);

        let hub = &cfg.routes[0];
        assert_eq!(hub.action, RouteAction::Forward);
        assert_eq!(hub.connect_timeout, Duration::from_secs(5));
        assert_eq!(hub.preamble_version, PreambleVersion::V2);
        assert_eq!(hub.mimic.as_deref(), Some("real.host:20001"));

        let closed = &cfg.routes[1];
        assert_eq!(closed.action, RouteAction::Reject);
        assert_eq!(
            closed.reject_message_json.as_deref(),
            Some(r#""server moved""#)
        );

        let fallback = &cfg.routes[2];
        assert_eq!(fallback.connect_timeout, Duration::from_secs(3));
        assert_eq!(fallback.preamble_version, PreambleVersion::Disabled);
    }

    #[test]
    fn route_defaults_pick_up_global_timeout() {
        let cfg = parse(
            r#"
listen: "0.0.0.0:25565"
default_connect_timeout: 7s
routes:
  - name: a
    matches: ["a.example.com"]
    target: "backend:25565"
"#,
        )
        .unwrap();
        assert_eq!(cfg.routes[0].connect_timeout, Duration::from_secs(7));
    }

    #[test]
    fn message_json_is_precomputed() {
        assert_eq!(
            prepared_message_json(Some(r#"{"text":"no","color":"red"}"#)).as_deref(),
            Some(r#"{"text":"no","color":"red"}"#)
        );
        assert_eq!(
            prepared_message_json(Some("plain \"quoted\" text")).as_deref(),
            Some(r#""plain \"quoted\" text""#)
        );
        assert_eq!(prepared_message_json(Some("")), None);
        assert_eq!(prepared_message_json(None), None);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(parse("listen: \"\"").is_err());
        assert!(parse("listen: \"not an address\"").is_err());

        // forward route without target
        assert!(parse(
            r#"
listen: ":25565"
routes:
  - name: a
    matches: ["a.example.com"]
"#
        )
        .is_err());

        // mimic must carry a port
        assert!(parse(
            r#"
listen: ":25565"
routes:
  - name: a
    matches: ["a.example.com"]
    target: "backend:25565"
    mimic: "real.host"
"#
        )
        .is_err());

        // unknown action
        assert!(parse(
            r#"
listen: ":25565"
routes:
  - name: a
    matches: ["a.example.com"]
    action: teleport
    target: "backend:25565"
"#
        )
        .is_err());

        // preamble version out of range
        assert!(parse(
            r#"
listen: ":25565"
routes:
  - name: a
    matches: ["a.example.com"]
    target: "backend:25565"
    preamble_version: 3
"#
        )
        .is_err());

        // zero duration
        assert!(parse("listen: \":25565\"\nsrv_lookup_timeout: 0s").is_err());
    }
}
